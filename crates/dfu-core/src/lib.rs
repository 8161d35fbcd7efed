//! DFU-Core: USB Device Firmware Upgrade session controller.
//!
//! This crate sequences a DFU update: open a device, read its DFU
//! functional descriptor, detach a runtime device into DFU mode, download a
//! firmware image and follow the device through manifestation.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Request codes, device states and status codes
//! - **Descriptor**: DFU functional descriptor parsing
//! - **Memory**: DfuSe memory layout strings
//! - **Driver**: Device access abstraction (nusb, mock)
//! - **State**: Session state and phase handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Firmware**: Product name → image lookup
//! - **Session**: The controller hosts talk to
//!
//! # Example
//!
//! ```no_run
//! use dfu_core::driver::find_dfu_devices;
//! use dfu_core::session::{DfuSession, SessionConfig};
//!
//! let mut session = DfuSession::new(SessionConfig::default());
//! for driver in find_dfu_devices(Some(0x04D8), None).expect("USB enumeration failed") {
//!     session.connect(driver).expect("connect failed");
//! }
//! ```

pub mod descriptor;
pub mod driver;
pub mod error;
pub mod events;
pub mod firmware;
pub mod memory;
pub mod protocol;
pub mod session;
pub mod state;
pub mod summary;

// Re-exports for convenience
pub use descriptor::{CapabilityDescriptor, parse_capability_descriptor};
pub use driver::{DeviceHandle, DeviceInfo, DfuDriver, DriverError, MockDriver, NusbDriver};
pub use error::{ConfigError, SessionError};
pub use events::{DfuEvent, DfuObserver, LogLevel, SessionPhase, TracingObserver};
pub use firmware::{FirmwareCatalog, FirmwareResolver};
pub use memory::{MemoryMap, MemorySegment, parse_memory_layout};
pub use protocol::{DfuState, DfuStatus, InterfaceRole};
pub use session::{DfuSession, DisconnectHandle, SessionConfig};
pub use state::{ConnectOutcome, DetachOutcome, DeviceKind, DownloadOutcome};
pub use summary::ConnectionSummary;

//! Device driver abstraction.
//!
//! Defines the `DfuDriver` trait the session controller drives, allowing
//! different implementations (nusb, mock, etc.).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{DfuStatus, InterfaceRole};

/// Low-level cause of a failed control or bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFault {
    /// Endpoint stalled the request.
    Stall,
    /// Device went away mid-transfer.
    Disconnected,
    /// Hardware fault or protocol violation.
    Fault,
    Cancelled,
    Other,
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFault::Stall => write!(f, "stall"),
            TransferFault::Disconnected => write!(f, "disconnected"),
            TransferFault::Fault => write!(f, "fault"),
            TransferFault::Cancelled => write!(f, "cancelled"),
            TransferFault::Other => write!(f, "other"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Descriptor unavailable: {0}")]
    DescriptorUnavailable(String),

    #[error("{message} ({fault})")]
    Transfer { fault: TransferFault, message: String },

    #[error("Device reported {0}")]
    Status(DfuStatus),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Device is not open")]
    NotOpen,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn transfer(fault: TransferFault, message: impl Into<String>) -> Self {
        DriverError::Transfer {
            fault,
            message: message.into(),
        }
    }

    /// Transfer failures that happen when the device drops off the bus while
    /// the host is still talking to it.
    pub fn is_bus_drop(&self) -> bool {
        matches!(
            self,
            DriverError::Transfer {
                fault: TransferFault::Disconnected | TransferFault::Fault,
                ..
            }
        )
    }
}

/// Bus-level identity of a physical device.
///
/// Used to tell "my tracked device" from any other device on the same host
/// when a removal event arrives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub bus_id: String,
    pub address: u8,
}

impl DeviceHandle {
    pub fn new(bus_id: impl Into<String>, address: u8) -> Self {
        Self {
            bus_id: bus_id.into(),
            address,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:03}", self.bus_id, self.address)
    }
}

/// Static facts about the device and the selected DFU interface, known
/// before the device is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub handle: DeviceHandle,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    /// Selected `bConfigurationValue`.
    pub configuration_value: u8,
    pub interface_number: u8,
    pub alt_setting: u8,
    /// `bInterfaceProtocol` of the selected alternate setting.
    pub interface_protocol: u8,
    /// Interface string; carries the memory layout on DfuSe devices.
    pub interface_name: Option<String>,
}

impl DeviceInfo {
    pub fn role(&self) -> InterfaceRole {
        InterfaceRole::from_protocol(self.interface_protocol)
    }
}

#[derive(Debug, Default)]
struct TokenFlags {
    cancelled: AtomicBool,
    removed: AtomicBool,
}

/// Flags shared between a session and the driver call currently blocked on
/// its behalf.
///
/// `cancel` means the session is gone and the call should give up.
/// `mark_removed` means the bus already reported the device gone, which is
/// what a pending `wait_disconnected` is waiting for.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<TokenFlags>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    pub fn mark_removed(&self) {
        self.0.removed.store(true, Ordering::SeqCst);
    }

    pub fn is_removed(&self) -> bool {
        self.0.removed.load(Ordering::SeqCst)
    }
}

/// Abstract DFU device driver.
///
/// The driver owns the physical connection, raw control transfers, status
/// polling and transfer chunking. Implementations:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait DfuDriver: Send {
    /// Device and interface the driver was created for.
    fn info(&self) -> &DeviceInfo;

    fn open(&mut self) -> Result<(), DriverError>;

    /// Raw configuration descriptor block (configuration descriptor followed
    /// by its interface, functional and endpoint descriptors).
    fn read_configuration_descriptor(&mut self, index: u8) -> Result<Vec<u8>, DriverError>;

    fn get_status(&mut self) -> Result<DfuStatus, DriverError>;

    fn clear_status(&mut self) -> Result<(), DriverError>;

    /// Issue `DFU_DETACH` with the given timeout (milliseconds).
    fn detach(&mut self, timeout_ms: u16) -> Result<(), DriverError>;

    /// Write `image` in `chunk_size` pieces, driving the write/poll cycle and
    /// the final manifestation request. `progress` receives `(done, total)`.
    fn download(
        &mut self,
        chunk_size: u16,
        image: &[u8],
        manifestation_tolerant: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;

    /// Block until the device has left the bus.
    ///
    /// Succeeds as soon as `cancel` reports the device removed. Fails with
    /// [`DriverError::Timeout`] once `timeout` elapses and with
    /// [`DriverError::Cancelled`] as soon as `cancel` fires.
    fn wait_disconnected(&mut self, timeout: Duration, cancel: &CancelToken) -> Result<(), DriverError>;
}

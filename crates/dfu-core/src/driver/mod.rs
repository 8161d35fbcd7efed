//! Driver layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockDriver, WaitBehavior};
pub use nusb::{NusbDriver, attached_devices, find_dfu_devices};
pub use traits::{CancelToken, DeviceHandle, DeviceInfo, DfuDriver, DriverError, TransferFault};

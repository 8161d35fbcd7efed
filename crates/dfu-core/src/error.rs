//! Errors surfaced at the session controller boundary.

use thiserror::Error;

use crate::driver::DriverError;
use crate::events::SessionPhase;

/// Controller-level failure. Driver errors are always wrapped into one of
/// these kinds before reaching the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to open device: {0}")]
    OpenFailed(DriverError),

    /// Non-fatal: the session continues with default capabilities.
    #[error("DFU descriptor unavailable: {0}")]
    DescriptorUnavailable(DriverError),

    #[error("Detach failed: {0}")]
    DetachFailed(DriverError),

    /// Non-fatal: the download is still attempted.
    #[error("Failed to clear status: {0}")]
    StatusClearFailed(DriverError),

    #[error("Download failed: {0}")]
    DownloadFailed(DriverError),

    /// Non-fatal: the session reflects whatever the bus actually did.
    #[error("Device did not disconnect: {0}")]
    DisconnectTimeout(DriverError),

    #[error("Device disconnected")]
    UnexpectedDisconnect,

    #[error("No device connected")]
    NotConnected,

    #[error("Cannot {operation} while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: SessionPhase,
    },

    #[error("Device does not support firmware download")]
    DownloadUnsupported,

    #[error("Firmware image is empty")]
    EmptyImage,

    #[error("No firmware image for product \"{0}\"")]
    FirmwareUnavailable(String),

    #[error("Transfer size must be greater than zero")]
    InvalidTransferSize,
}

/// Failure loading or saving a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

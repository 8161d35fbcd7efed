//! Protocol constants from the USB DFU 1.1 class specification.
//!
//! STMicroelectronics' DfuSe extension (AN3156) is only recognised by its
//! version number; its addressing commands are left to drivers.

// ============================================================================
// Interface Identification
// ============================================================================

/// Application specific interface class
pub const DFU_INTERFACE_CLASS: u8 = 0xFE;
/// Device Firmware Upgrade subclass
pub const DFU_INTERFACE_SUBCLASS: u8 = 0x01;

/// Interface protocol while the device runs its application
pub const DFU_PROTOCOL_RUNTIME: u8 = 0x01;
/// Interface protocol once the device is in DFU mode
pub const DFU_PROTOCOL_DFU_MODE: u8 = 0x02;

// ============================================================================
// Descriptors
// ============================================================================

pub const DT_CONFIGURATION: u8 = 0x02;
pub const DT_INTERFACE: u8 = 0x04;
/// DFU functional descriptor type
pub const DT_DFU_FUNCTIONAL: u8 = 0x21;

/// Length of a functional descriptor that carries `bcdDFUVersion`
pub const DFU_FUNCTIONAL_DESC_LEN: usize = 9;

/// `bcdDFUVersion` reported by DfuSe (extended addressing) devices
pub const DFUSE_VERSION_NUMBER: u16 = 0x011A;

// ============================================================================
// Class Requests (Host -> Device)
// ============================================================================

pub const DFU_DETACH: u8 = 0;
pub const DFU_DNLOAD: u8 = 1;
pub const DFU_UPLOAD: u8 = 2;
pub const DFU_GETSTATUS: u8 = 3;
pub const DFU_CLRSTATUS: u8 = 4;
pub const DFU_GETSTATE: u8 = 5;
pub const DFU_ABORT: u8 = 6;

/// GETSTATUS response length
pub const DFU_STATUS_LEN: u16 = 6;

// ============================================================================
// Status Codes (bStatus)
// ============================================================================

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR_TARGET: u8 = 0x01;
pub const STATUS_ERR_FILE: u8 = 0x02;
pub const STATUS_ERR_WRITE: u8 = 0x03;
pub const STATUS_ERR_ERASE: u8 = 0x04;
pub const STATUS_ERR_CHECK_ERASED: u8 = 0x05;
pub const STATUS_ERR_PROG: u8 = 0x06;
pub const STATUS_ERR_VERIFY: u8 = 0x07;
pub const STATUS_ERR_ADDRESS: u8 = 0x08;
pub const STATUS_ERR_NOTDONE: u8 = 0x09;
pub const STATUS_ERR_FIRMWARE: u8 = 0x0A;
pub const STATUS_ERR_VENDOR: u8 = 0x0B;
pub const STATUS_ERR_USBR: u8 = 0x0C;
pub const STATUS_ERR_POR: u8 = 0x0D;
pub const STATUS_ERR_UNKNOWN: u8 = 0x0E;
pub const STATUS_ERR_STALLEDPKT: u8 = 0x0F;

// ============================================================================
// Session Defaults
// ============================================================================

/// Transfer size used until the capability descriptor says otherwise.
pub const DEFAULT_TRANSFER_SIZE: u16 = 1024 * 2;

/// How long to wait for the device to leave the bus after detach or
/// manifestation.
pub const DISCONNECT_TIMEOUT_MS: u64 = 5000;

/// Transport message some hosts report when the device drops off the bus in
/// the middle of the detach request.
pub const KNOWN_DETACH_TRANSFER_ERROR: &str =
    "ControlTransferOut failed: NetworkError: A transfer error has occurred.";

/// Human readable name for a `bStatus` code.
pub fn status_description(code: u8) -> &'static str {
    match code {
        STATUS_OK => "No error condition is present",
        STATUS_ERR_TARGET => "File is not targeted for use by this device",
        STATUS_ERR_FILE => "File fails some vendor-specific verification test",
        STATUS_ERR_WRITE => "Device is unable to write memory",
        STATUS_ERR_ERASE => "Memory erase function failed",
        STATUS_ERR_CHECK_ERASED => "Memory erase check failed",
        STATUS_ERR_PROG => "Program memory function failed",
        STATUS_ERR_VERIFY => "Programmed memory failed verification",
        STATUS_ERR_ADDRESS => "Address out of range",
        STATUS_ERR_NOTDONE => "Received zero-length download but data is incomplete",
        STATUS_ERR_FIRMWARE => "Device firmware is corrupt",
        STATUS_ERR_VENDOR => "Vendor-specific error",
        STATUS_ERR_USBR => "Unexpected USB reset signaling",
        STATUS_ERR_POR => "Unexpected power on reset",
        STATUS_ERR_UNKNOWN => "Something went wrong",
        STATUS_ERR_STALLEDPKT => "Device stalled an unexpected request",
        _ => "Unknown status code",
    }
}

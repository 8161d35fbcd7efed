//! Device state and status as reported by `DFU_GETSTATUS`.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use super::constants::{DFU_PROTOCOL_DFU_MODE, DFU_PROTOCOL_RUNTIME, STATUS_OK, status_description};

/// Device state (`bState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DnloadSync,
    DnloadBusy,
    DnloadIdle,
    ManifestSync,
    Manifest,
    ManifestWaitReset,
    UploadIdle,
    Error,
    Unknown(u8),
}

impl DfuState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DfuState::AppIdle,
            1 => DfuState::AppDetach,
            2 => DfuState::DfuIdle,
            3 => DfuState::DnloadSync,
            4 => DfuState::DnloadBusy,
            5 => DfuState::DnloadIdle,
            6 => DfuState::ManifestSync,
            7 => DfuState::Manifest,
            8 => DfuState::ManifestWaitReset,
            9 => DfuState::UploadIdle,
            10 => DfuState::Error,
            other => DfuState::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            DfuState::AppIdle => 0,
            DfuState::AppDetach => 1,
            DfuState::DfuIdle => 2,
            DfuState::DnloadSync => 3,
            DfuState::DnloadBusy => 4,
            DfuState::DnloadIdle => 5,
            DfuState::ManifestSync => 6,
            DfuState::Manifest => 7,
            DfuState::ManifestWaitReset => 8,
            DfuState::UploadIdle => 9,
            DfuState::Error => 10,
            DfuState::Unknown(other) => *other,
        }
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuState::AppIdle => write!(f, "appIDLE"),
            DfuState::AppDetach => write!(f, "appDETACH"),
            DfuState::DfuIdle => write!(f, "dfuIDLE"),
            DfuState::DnloadSync => write!(f, "dfuDNLOAD-SYNC"),
            DfuState::DnloadBusy => write!(f, "dfuDNBUSY"),
            DfuState::DnloadIdle => write!(f, "dfuDNLOAD-IDLE"),
            DfuState::ManifestSync => write!(f, "dfuMANIFEST-SYNC"),
            DfuState::Manifest => write!(f, "dfuMANIFEST"),
            DfuState::ManifestWaitReset => write!(f, "dfuMANIFEST-WAIT-RESET"),
            DfuState::UploadIdle => write!(f, "dfuUPLOAD-IDLE"),
            DfuState::Error => write!(f, "dfuERROR"),
            DfuState::Unknown(v) => write!(f, "UNKNOWN(0x{:02X})", v),
        }
    }
}

/// Decoded `DFU_GETSTATUS` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatus {
    /// `bStatus`
    pub status_code: u8,
    /// `bwPollTimeout`, milliseconds to wait before the next GETSTATUS.
    pub poll_timeout: u32,
    /// `bState`
    pub state: DfuState,
}

impl DfuStatus {
    /// Decode the 6-byte status payload. Returns `None` when too short.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 6 {
            return None;
        }
        Some(Self {
            status_code: data[0],
            poll_timeout: LittleEndian::read_u24(&data[1..4]),
            state: DfuState::from_u8(data[4]),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == STATUS_OK
    }

    pub fn is_error_state(&self) -> bool {
        self.state == DfuState::Error
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} status={} ({})",
            self.state,
            self.status_code,
            status_description(self.status_code)
        )
    }
}

/// What the selected interface is currently doing, from `bInterfaceProtocol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceRole {
    /// Application firmware is running; a detach is needed before any transfer.
    Runtime,
    /// Device is in DFU mode and accepts transfers.
    Dfu,
    Unknown(u8),
}

impl InterfaceRole {
    pub fn from_protocol(protocol: u8) -> Self {
        match protocol {
            DFU_PROTOCOL_RUNTIME => InterfaceRole::Runtime,
            DFU_PROTOCOL_DFU_MODE => InterfaceRole::Dfu,
            other => InterfaceRole::Unknown(other),
        }
    }
}

impl fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceRole::Runtime => write!(f, "Runtime"),
            InterfaceRole::Dfu => write!(f, "DFU"),
            InterfaceRole::Unknown(_) => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_decoding() {
        let st = DfuStatus::from_bytes(&[0x00, 0x10, 0x27, 0x00, 0x05, 0x00]).unwrap();
        assert!(st.is_ok());
        assert_eq!(st.poll_timeout, 10_000);
        assert_eq!(st.state, DfuState::DnloadIdle);
    }

    #[test]
    fn test_error_state() {
        let st = DfuStatus::from_bytes(&[0x0E, 0, 0, 0, 10, 0]).unwrap();
        assert!(!st.is_ok());
        assert!(st.is_error_state());
        assert_eq!(st.to_string(), "state=dfuERROR status=14 (Something went wrong)");
    }

    #[test]
    fn test_short_status() {
        assert!(DfuStatus::from_bytes(&[0, 0, 0]).is_none());
    }

    #[test]
    fn test_state_roundtrip_unknown() {
        assert_eq!(DfuState::from_u8(42), DfuState::Unknown(42));
        assert_eq!(DfuState::Unknown(42).as_u8(), 42);
    }

    #[test]
    fn test_interface_role() {
        assert_eq!(InterfaceRole::from_protocol(1), InterfaceRole::Runtime);
        assert_eq!(InterfaceRole::from_protocol(2), InterfaceRole::Dfu);
        assert_eq!(InterfaceRole::from_protocol(0), InterfaceRole::Unknown(0));
    }
}

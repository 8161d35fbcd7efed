//! dfu-util style description of a negotiated connection.

use std::fmt;

use crate::descriptor::CapabilityDescriptor;
use crate::driver::DeviceInfo;
use crate::memory::MemoryMap;

/// What the host shows once a device is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub device: DeviceInfo,
    pub descriptor: Option<CapabilityDescriptor>,
    pub memory: Option<MemoryMap>,
}

impl ConnectionSummary {
    /// `Name` / `MFG` / `Serial` lines.
    pub fn usb_info(&self) -> String {
        format!(
            "Name: {}\nMFG: {}\nSerial: {}",
            self.device.product_name.as_deref().unwrap_or(""),
            self.device.manufacturer.as_deref().unwrap_or(""),
            self.device.serial_number.as_deref().unwrap_or("")
        )
    }

    /// Single line in dfu-util `--list` format.
    pub fn dfu_line(&self) -> String {
        let d = &self.device;
        format!(
            "{}: [{:04x}:{:04x}] cfg={}, intf={}, alt={}, name=\"{}\" serial=\"{}\"",
            d.role(),
            d.vendor_id,
            d.product_id,
            d.configuration_value,
            d.interface_number,
            d.alt_setting,
            d.product_name.as_deref().unwrap_or(""),
            d.serial_number.as_deref().unwrap_or("")
        )
    }
}

impl fmt::Display for ConnectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.usb_info(), self.dfu_line())?;
        if let Some(desc) = &self.descriptor {
            write!(f, "\n{}", desc)?;
        }
        if let Some(memory) = &self.memory {
            write!(f, "\n{}", memory)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DeviceHandle;
    use crate::memory::parse_memory_layout;

    fn device(protocol: u8) -> DeviceInfo {
        DeviceInfo {
            handle: DeviceHandle::new("3", 7),
            vendor_id: 0x0483,
            product_id: 0xdf11,
            product_name: Some("STM32 BOOTLOADER".into()),
            manufacturer: Some("STMicroelectronics".into()),
            serial_number: Some("3276365F3231".into()),
            configuration_value: 1,
            interface_number: 0,
            alt_setting: 0,
            interface_protocol: protocol,
            interface_name: None,
        }
    }

    #[test]
    fn test_dfu_line() {
        let summary = ConnectionSummary {
            device: device(2),
            descriptor: None,
            memory: None,
        };
        assert_eq!(
            summary.dfu_line(),
            "DFU: [0483:df11] cfg=1, intf=0, alt=0, name=\"STM32 BOOTLOADER\" serial=\"3276365F3231\""
        );
        assert_eq!(
            summary.usb_info(),
            "Name: STM32 BOOTLOADER\nMFG: STMicroelectronics\nSerial: 3276365F3231"
        );
    }

    #[test]
    fn test_full_summary() {
        let descriptor =
            CapabilityDescriptor::from_raw(&[9, 0x21, 0x0B, 0xFF, 0x00, 0x00, 0x08, 0x1A, 0x01]);
        let summary = ConnectionSummary {
            device: device(2),
            descriptor,
            memory: parse_memory_layout("@Internal Flash  /0x08000000/01*016Kg"),
        };
        let text = summary.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "Name: STM32 BOOTLOADER");
        assert_eq!(lines[2], "Serial: 3276365F3231");
        assert!(lines[3].starts_with("DFU: [0483:df11]"));
        assert!(lines[4].starts_with("WillDetach=true, ManifestationTolerant=false"));
        assert_eq!(lines[5], "Selected memory region: Internal Flash (16KiB)");
        assert_eq!(lines[6], "0x08000000-0x08003fff (readable, erasable, writable)");
    }

    #[test]
    fn test_unknown_role() {
        let summary = ConnectionSummary {
            device: device(0),
            descriptor: None,
            memory: None,
        };
        assert!(summary.dfu_line().starts_with("Unknown: "));
    }
}

//! DFU functional (capability) descriptor.
//!
//! The functional descriptor is found inside the configuration descriptor
//! block, right after the DFU interface it belongs to (DFU 1.1, section 4.1.3).

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};

use crate::protocol::constants::{
    DFU_FUNCTIONAL_DESC_LEN, DFU_INTERFACE_CLASS, DFU_INTERFACE_SUBCLASS, DFUSE_VERSION_NUMBER,
    DT_CONFIGURATION, DT_DFU_FUNCTIONAL, DT_INTERFACE,
};

/// Parsed DFU functional descriptor. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Device leaves the bus on its own after `DFU_DETACH` (`bitWillDetach`).
    pub will_detach: bool,
    /// Device stays operable after manifestation (`bitManifestationTolerant`).
    pub manifestation_tolerant: bool,
    /// `bitCanUpload`
    pub can_upload: bool,
    /// `bitCanDnload`
    pub can_download: bool,
    /// Maximum bytes per control-write transaction (`wTransferSize`).
    pub transfer_size: u16,
    /// Milliseconds the device waits for a reset after detach (`wDetachTimeOut`).
    pub detach_timeout_ms: u16,
    /// `bcdDFUVersion`
    pub protocol_version: u16,
}

impl CapabilityDescriptor {
    const BIT_CAN_DNLOAD: u8 = 1 << 0;
    const BIT_CAN_UPLOAD: u8 = 1 << 1;
    const BIT_MANIFESTATION_TOLERANT: u8 = 1 << 2;
    const BIT_WILL_DETACH: u8 = 1 << 3;

    /// Decode from a raw functional descriptor (`bLength` first).
    /// Returns `None` if the slice cannot hold `bcdDFUVersion`.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        if raw.len() < DFU_FUNCTIONAL_DESC_LEN {
            return None;
        }
        let flags = Self::decode_attributes(raw[2]);
        Some(Self {
            detach_timeout_ms: LittleEndian::read_u16(&raw[3..5]),
            transfer_size: LittleEndian::read_u16(&raw[5..7]),
            protocol_version: LittleEndian::read_u16(&raw[7..9]),
            ..flags
        })
    }

    /// Decode `bmAttributes` alone; the numeric fields are zeroed.
    pub fn decode_attributes(attributes: u8) -> Self {
        Self {
            will_detach: attributes & Self::BIT_WILL_DETACH != 0,
            manifestation_tolerant: attributes & Self::BIT_MANIFESTATION_TOLERANT != 0,
            can_upload: attributes & Self::BIT_CAN_UPLOAD != 0,
            can_download: attributes & Self::BIT_CAN_DNLOAD != 0,
            transfer_size: 0,
            detach_timeout_ms: 0,
            protocol_version: 0,
        }
    }

    /// The device speaks the DfuSe extended addressing variant.
    pub fn is_extended_addressing(&self) -> bool {
        self.protocol_version == DFUSE_VERSION_NUMBER
    }
}

impl fmt::Display for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WillDetach={}, ManifestationTolerant={}, CanUpload={}, CanDnload={}, TransferSize={}, DetachTimeOut={}, Version={:04x}",
            self.will_detach,
            self.manifestation_tolerant,
            self.can_upload,
            self.can_download,
            self.transfer_size,
            self.detach_timeout_ms,
            self.protocol_version
        )
    }
}

/// Find the capability descriptor in a configuration descriptor block.
///
/// Only the configuration whose `bConfigurationValue` equals
/// `selected_configuration` is eligible. The first functional descriptor
/// inside a DFU interface wins. Malformed blocks yield `None`.
pub fn parse_capability_descriptor(
    config_block: &[u8],
    selected_configuration: u8,
) -> Option<CapabilityDescriptor> {
    let mut descriptors = DescriptorIter::new(config_block);

    let config = descriptors.next()?;
    if config.len() < 6 || config[1] != DT_CONFIGURATION {
        debug!("Descriptor block does not start with a configuration descriptor");
        return None;
    }
    let configuration_value = config[5];
    if configuration_value != selected_configuration {
        debug!(
            found = configuration_value,
            selected = selected_configuration,
            "Configuration value mismatch"
        );
        return None;
    }

    let mut in_dfu_interface = false;
    for desc in descriptors {
        match desc[1] {
            DT_INTERFACE if desc.len() >= 9 => {
                in_dfu_interface =
                    desc[5] == DFU_INTERFACE_CLASS && desc[6] == DFU_INTERFACE_SUBCLASS;
            }
            DT_DFU_FUNCTIONAL if in_dfu_interface => {
                if let Some(caps) = CapabilityDescriptor::from_raw(desc) {
                    trace!(?caps, "Found DFU functional descriptor");
                    return Some(caps);
                }
            }
            _ => {}
        }
    }
    None
}

/// Walks a descriptor block using each descriptor's `bLength`.
struct DescriptorIter<'a> {
    data: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let len = self.data[0] as usize;
        if len < 2 || len > self.data.len() {
            self.data = &[];
            return None;
        }
        let (desc, rest) = self.data.split_at(len);
        self.data = rest;
        Some(desc)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Configuration block with one DFU interface and its functional descriptor.
    pub(crate) fn config_block(
        configuration_value: u8,
        protocol: u8,
        attributes: u8,
        transfer_size: u16,
        version: u16,
    ) -> Vec<u8> {
        let mut block = vec![9, DT_CONFIGURATION, 27, 0, 1, configuration_value, 0, 0x80, 50];
        block.extend_from_slice(&[
            9,
            DT_INTERFACE,
            0,
            0,
            0,
            DFU_INTERFACE_CLASS,
            DFU_INTERFACE_SUBCLASS,
            protocol,
            0,
        ]);
        let ts = transfer_size.to_le_bytes();
        let v = version.to_le_bytes();
        block.extend_from_slice(&[9, DT_DFU_FUNCTIONAL, attributes, 0xFF, 0x00, ts[0], ts[1], v[0], v[1]]);
        block
    }

    #[test]
    fn test_parse_functional_descriptor() {
        let block = config_block(1, 2, 0x0B, 2048, 0x0110);
        let caps = parse_capability_descriptor(&block, 1).unwrap();
        assert!(caps.will_detach);
        assert!(!caps.manifestation_tolerant);
        assert!(caps.can_upload);
        assert!(caps.can_download);
        assert_eq!(caps.transfer_size, 2048);
        assert_eq!(caps.detach_timeout_ms, 255);
        assert_eq!(caps.protocol_version, 0x0110);
        assert!(!caps.is_extended_addressing());
    }

    #[test]
    fn test_configuration_mismatch() {
        for value in [0u8, 2, 3, 0xFF] {
            let block = config_block(value, 2, 0x0F, 1024, 0x011A);
            assert_eq!(parse_capability_descriptor(&block, 1), None);
        }
    }

    #[test]
    fn test_attribute_bits_exhaustive() {
        for attrs in 0u8..16 {
            let caps = CapabilityDescriptor::decode_attributes(attrs);
            assert_eq!(caps.will_detach, attrs & 0x08 != 0);
            assert_eq!(caps.manifestation_tolerant, attrs & 0x04 != 0);
            assert_eq!(caps.can_upload, attrs & 0x02 != 0);
            assert_eq!(caps.can_download, attrs & 0x01 != 0);

            let block = config_block(1, 2, attrs | 0xF0, 64, 0x0110);
            let parsed = parse_capability_descriptor(&block, 1).unwrap();
            assert_eq!(parsed.will_detach, caps.will_detach);
            assert_eq!(parsed.manifestation_tolerant, caps.manifestation_tolerant);
            assert_eq!(parsed.can_upload, caps.can_upload);
            assert_eq!(parsed.can_download, caps.can_download);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let mut block = config_block(1, 2, 0x01, 512, 0x0110);
        block.extend_from_slice(&[9, DT_DFU_FUNCTIONAL, 0x0F, 0, 0, 0, 4, 0x1A, 0x01]);
        let caps = parse_capability_descriptor(&block, 1).unwrap();
        assert_eq!(caps.transfer_size, 512);
    }

    #[test]
    fn test_functional_outside_dfu_interface_ignored() {
        // HID descriptors share type 0x21.
        let block = vec![
            9, DT_CONFIGURATION, 27, 0, 1, 1, 0, 0x80, 50,
            9, DT_INTERFACE, 0, 0, 1, 0x03, 0, 0, 0,
            9, DT_DFU_FUNCTIONAL, 0x11, 0x01, 0, 1, 0x22, 0x40, 0,
        ];
        assert_eq!(parse_capability_descriptor(&block, 1), None);
    }

    #[test]
    fn test_short_functional_descriptor_ignored() {
        let mut block = config_block(1, 2, 0x0F, 64, 0x0110);
        // Replace the functional descriptor with a DFU 1.0 style 7-byte one.
        block.truncate(18);
        block.extend_from_slice(&[7, DT_DFU_FUNCTIONAL, 0x0F, 0, 0, 64, 0]);
        assert_eq!(parse_capability_descriptor(&block, 1), None);
    }

    #[test]
    fn test_malformed_blocks() {
        assert_eq!(parse_capability_descriptor(&[], 1), None);
        assert_eq!(parse_capability_descriptor(&[9], 1), None);
        assert_eq!(parse_capability_descriptor(&[0, 2, 0, 0], 1), None);

        let mut block = config_block(1, 2, 0x0F, 64, 0x0110);
        // Length byte of the functional descriptor overruns the block.
        block[18] = 40;
        assert_eq!(parse_capability_descriptor(&block, 1), None);
    }

    #[test]
    fn test_display() {
        let caps = CapabilityDescriptor::from_raw(&[9, 0x21, 0x0D, 0xE8, 0x03, 0, 8, 0x1A, 0x01]).unwrap();
        assert_eq!(
            caps.to_string(),
            "WillDetach=true, ManifestationTolerant=true, CanUpload=false, CanDnload=true, TransferSize=2048, DetachTimeOut=1000, Version=011a"
        );
        assert!(caps.is_extended_addressing());
    }
}

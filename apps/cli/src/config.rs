//! Host-side configuration, loaded from TOML.

use std::path::Path;

use anyhow::{Context, Result};
use dfu_core::session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Vendor id the Kiwrious sensors enumerate with.
pub const DEFAULT_VENDOR_ID: u16 = 0x04D8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Only consider devices with this vendor id. `None` matches any device.
    pub vendor_id: Option<u16>,
    /// Only consider the device with this serial number.
    pub serial: Option<String>,
    /// How long to wait for the device to come back in DFU mode.
    pub reconnect_timeout_ms: u64,
    pub session: SessionConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            vendor_id: Some(DEFAULT_VENDOR_ID),
            serial: None,
            reconnect_timeout_ms: 10_000,
            session: SessionConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }
}

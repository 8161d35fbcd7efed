//! Firmware image resolution keyed by product name.
//!
//! Deciding which image belongs to which product is a host concern; the
//! controller only asks the resolver before detaching a runtime device.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Looks up the firmware image for a product.
pub trait FirmwareResolver: Send + Sync {
    /// Image bytes for `product_name`, or `None` when there is no match.
    fn resolve(&self, product_name: &str) -> Option<Vec<u8>>;
}

impl<F> FirmwareResolver for F
where
    F: Fn(&str) -> Option<Vec<u8>> + Send + Sync,
{
    fn resolve(&self, product_name: &str) -> Option<Vec<u8>> {
        self(product_name)
    }
}

/// One catalog entry: products whose name contains `product_match` use the
/// image at `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareEntry {
    pub product_match: String,
    pub path: PathBuf,
}

/// Ordered product-name → image file table. The first matching entry wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareCatalog {
    /// Directory relative entry paths are resolved against.
    pub base_dir: Option<PathBuf>,
    pub entries: Vec<FirmwareEntry>,
}

impl Default for FirmwareCatalog {
    fn default() -> Self {
        Self {
            base_dir: None,
            entries: vec![
                FirmwareEntry {
                    product_match: "UV".into(),
                    path: PathBuf::from("SENSOR_UV.dfu"),
                },
                FirmwareEntry {
                    product_match: "Heart Rate".into(),
                    path: PathBuf::from("SENSOR_HR.dfu"),
                },
            ],
        }
    }
}

impl FirmwareCatalog {
    pub fn with_base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Path of the image for `product_name`, if any entry matches.
    pub fn lookup(&self, product_name: &str) -> Option<PathBuf> {
        let entry = self
            .entries
            .iter()
            .find(|e| product_name.contains(e.product_match.as_str()))?;
        Some(match &self.base_dir {
            Some(dir) if entry.path.is_relative() => dir.join(&entry.path),
            _ => entry.path.clone(),
        })
    }
}

impl FirmwareResolver for FirmwareCatalog {
    fn resolve(&self, product_name: &str) -> Option<Vec<u8>> {
        let Some(path) = self.lookup(product_name) else {
            debug!(product = %product_name, "No firmware entry for product");
            return None;
        };
        match std::fs::read(&path) {
            Ok(data) => {
                info!(path = %path.display(), size = data.len(), "Loaded firmware image");
                Some(data)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to load firmware image");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_lookup() {
        let catalog = FirmwareCatalog::default();
        assert_eq!(
            catalog.lookup("Kiwrious UV Sensor"),
            Some(PathBuf::from("SENSOR_UV.dfu"))
        );
        assert_eq!(
            catalog.lookup("Kiwrious Heart Rate Sensor"),
            Some(PathBuf::from("SENSOR_HR.dfu"))
        );
        assert_eq!(catalog.lookup("Kiwrious Humidity Sensor"), None);
    }

    #[test]
    fn test_base_dir_applies_to_relative_paths() {
        let catalog = FirmwareCatalog::default().with_base_dir("/opt/fw");
        assert_eq!(
            catalog.lookup("UV"),
            Some(PathBuf::from("/opt/fw/SENSOR_UV.dfu"))
        );
    }

    #[test]
    fn test_resolve_reads_file() {
        let dir = std::env::temp_dir().join(format!("dfu-core-fw-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SENSOR_UV.dfu"), [1u8, 2, 3]).unwrap();

        let catalog = FirmwareCatalog::default().with_base_dir(&dir);
        assert_eq!(catalog.resolve("UV Sensor"), Some(vec![1, 2, 3]));
        // Entry matches but the file does not exist.
        assert_eq!(catalog.resolve("Heart Rate"), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |name: &str| (name == "X").then(|| vec![0xAA]);
        assert_eq!(resolver.resolve("X"), Some(vec![0xAA]));
        assert_eq!(resolver.resolve("Y"), None);
    }

    #[test]
    fn test_catalog_toml() {
        let catalog: FirmwareCatalog = toml::from_str(
            r#"
            [[entries]]
            product_match = "Conductivity"
            path = "SENSOR_EC.dfu"
            "#,
        )
        .unwrap();
        assert_eq!(catalog.base_dir, None);
        assert_eq!(catalog.entries.len(), 1);
        assert_eq!(catalog.lookup("Conductivity"), Some(PathBuf::from("SENSOR_EC.dfu")));
    }
}

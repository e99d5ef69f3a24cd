//! Device configuration: which instruments exist and which examination
//! items they serve.
//!
//! # File format
//!
//! ```toml
//! [[devices]]
//! id = "scale_1"
//! model = "tbf210"
//! address = "/dev/ttyUSB0"
//! strictness = "strict"   # optional, overrides the driver default
//!
//! [[items]]
//! form_id = 101
//! sub_id = 0
//! device = "scale_1"
//! ```
//!
//! [`HardwareConfig`] implements [`DeviceDirectory`], so the orchestrator can
//! resolve items straight from a loaded file.

use std::collections::HashSet;
use std::path::Path;

use medlink_core::{DeviceDescriptor, DeviceDirectory, DeviceModel, Strictness};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors raised while loading or validating a device configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read device config '{path}': {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML or does not match the schema.
    #[error("cannot parse device config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Cross-entry validation failed.
    #[error("invalid device config: {0}")]
    Invalid(String),
}

/// One configured instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Unique device identifier.
    pub id: String,
    /// Instrument model label, e.g. `"dc320"`.
    pub model: DeviceModel,
    /// Transport address.
    pub address: String,
    /// Per-device strictness override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strictness: Option<Strictness>,
}

impl DeviceEntry {
    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: self.id.clone(),
            address: self.address.clone(),
            model: self.model,
            strictness: self.strictness,
        }
    }
}

/// Examination item served by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntry {
    /// Examination form identifier.
    pub form_id: u32,
    /// Sub-identifier within the form.
    #[serde(default)]
    pub sub_id: u32,
    /// Id of the serving device.
    pub device: String,
}

/// Devices plus the item → device mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Configured instruments.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    /// Examination item mapping.
    #[serde(default)]
    pub items: Vec<ItemEntry>,
}

impl HardwareConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading device config");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(
            devices = config.devices.len(),
            items = config.items.len(),
            "device config loaded"
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ids are unique, addresses are set and items reference devices.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(ConfigError::Invalid("device id cannot be empty".into()));
            }
            if !ids.insert(device.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate device id '{}'", device.id)));
            }
            if device.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' has no address",
                    device.id
                )));
            }
        }

        let mut keys = HashSet::new();
        for item in &self.items {
            if !ids.contains(item.device.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "item {}/{} references unknown device '{}'",
                    item.form_id, item.sub_id, item.device
                )));
            }
            if !keys.insert((item.form_id, item.sub_id)) {
                return Err(ConfigError::Invalid(format!(
                    "item {}/{} is mapped twice",
                    item.form_id, item.sub_id
                )));
            }
        }
        Ok(())
    }

    /// Device entry by id.
    pub fn device(&self, device_id: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.id == device_id)
    }
}

impl DeviceDirectory for HardwareConfig {
    fn resolve_device(&self, form_id: u32, sub_id: u32) -> Option<DeviceDescriptor> {
        let item = self
            .items
            .iter()
            .find(|i| i.form_id == form_id && i.sub_id == sub_id)?;
        self.device(&item.device).map(DeviceEntry::descriptor)
    }

    fn descriptor(&self, device_id: &str) -> Option<DeviceDescriptor> {
        self.device(device_id).map(DeviceEntry::descriptor)
    }
}

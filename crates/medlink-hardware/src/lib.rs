//! Hardware layer for medlink.
//!
//! - [`registry`]: model → driver lookup built from the shipped drivers
//! - [`config`]: device and examination item configuration (TOML)
//! - [`orchestrator`]: single-flight acquire / send / cancel
//! - [`serial`]: blocking serial transport (feature `serial`)

pub mod config;
pub mod orchestrator;
pub mod registry;
#[cfg(feature = "serial")]
pub mod serial;

pub use config::{ConfigError, DeviceEntry, HardwareConfig, ItemEntry};
pub use orchestrator::{Orchestrator, OrchestratorError, SessionGuard};
pub use registry::{DriverRegistry, RegistryError};
#[cfg(feature = "serial")]
pub use serial::{SerialFactory, SerialSettings, SerialTransport};

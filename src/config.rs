//! Application configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/medlink.toml` (base configuration)
//! 2. Environment variables prefixed with `MEDLINK_`, nested keys separated
//!    by a double underscore (`MEDLINK_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use medlink::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), figment::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use medlink_core::RunLimits;
use serde::{Deserialize, Serialize};

use crate::tracing_init::OutputFormat;

/// Default location of the application configuration.
pub const DEFAULT_CONFIG_PATH: &str = "config/medlink.toml";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Run limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Path of the device configuration file
    #[serde(default = "default_hardware_config")]
    pub hardware_config: PathBuf,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Log output configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
}

/// Bounds applied to every measurement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum receive-loop exchanges per run
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    /// Wall-clock limit for receive loops in seconds (0 = none)
    #[serde(default)]
    pub deadline_secs: u64,
    /// Settle delay after a send-only write in milliseconds; unset keeps
    /// each driver's own delay
    #[serde(default)]
    pub settle_ms: Option<u64>,
}

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Longest wait for a read to produce data, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

// Default value functions
fn default_name() -> String {
    "medlink".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_exchanges() -> usize {
    64
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_hardware_config() -> PathBuf {
    PathBuf::from("config/devices.toml")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            deadline_secs: 0,
            settle_ms: None,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl OrchestratorConfig {
    /// Run limits for the orchestrator.
    pub fn limits(&self) -> RunLimits {
        RunLimits {
            max_exchanges: self.max_exchanges,
            deadline: (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs)),
            settle: self.settle_ms.map(Duration::from_millis),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/medlink.toml` and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MEDLINK_").split("__"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.orchestrator.max_exchanges == 0 {
            return Err("max_exchanges must be at least 1".to_string());
        }

        if self.serial.baud_rate == 0 {
            return Err("baud_rate must be positive".to_string());
        }

        if self.serial.read_timeout_ms == 0 {
            return Err("read_timeout_ms must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let config = AppConfig::load_from("/nonexistent/medlink.toml").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.limits(), RunLimits::default());
    }

    #[test]
    #[serial]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            hardware_config = "/etc/medlink/devices.toml"

            [application]
            log_level = "debug"

            [logging]
            format = "json"

            [orchestrator]
            max_exchanges = 16
            deadline_secs = 30
            settle_ms = 250

            [serial]
            baud_rate = 2400
            "#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "medlink");
        assert_eq!(config.logging.format, OutputFormat::Json);
        assert_eq!(config.serial.baud_rate, 2400);
        assert_eq!(config.serial.read_timeout_ms, 10_000);
        assert_eq!(config.hardware_config, PathBuf::from("/etc/medlink/devices.toml"));

        let limits = config.orchestrator.limits();
        assert_eq!(limits.max_exchanges, 16);
        assert_eq!(limits.deadline, Some(Duration::from_secs(30)));
        assert_eq!(limits.settle, Some(Duration::from_millis(250)));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("medlink.toml", "[application]\nlog_level = \"warn\"\n")?;
            jail.set_env("MEDLINK_APPLICATION__LOG_LEVEL", "trace");
            let config = AppConfig::load_from("medlink.toml")?;
            assert_eq!(config.application.log_level, "trace");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.orchestrator.max_exchanges = 0;
        assert!(config.validate().is_err());
    }
}

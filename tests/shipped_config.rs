//! The configuration files shipped in `config/` load and validate.

use std::path::PathBuf;

use medlink::config::AppConfig;
use medlink_core::{DeviceDirectory, DeviceModel};
use medlink_hardware::{DriverRegistry, HardwareConfig};

fn shipped(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
}

/// Test the application configuration validates
#[test]
fn test_app_config_is_valid() {
    let config = AppConfig::load_from(shipped("medlink.toml")).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.orchestrator.limits().max_exchanges, 64);
}

/// Test every shipped device has a driver
#[test]
fn test_devices_have_drivers() {
    let devices = HardwareConfig::load(&shipped("devices.toml")).unwrap();
    let registry = DriverRegistry::builtin();
    for device in &devices.devices {
        assert!(registry.supports(device.model), "{}", device.id);
    }
    let tonometer = devices.resolve_device(401, 1).unwrap();
    assert_eq!(tonometer.model, DeviceModel::Tx20P);
}

//! Configuration contract: examination item -> device.

use crate::model::DeviceDescriptor;

/// Resolves examination items to configured devices.
///
/// Implemented by `medlink_hardware::config::HardwareConfig`; tests use
/// in-memory implementations.
pub trait DeviceDirectory: Send + Sync {
    /// Device mapped to an examination form and sub-identifier.
    fn resolve_device(&self, form_id: u32, sub_id: u32) -> Option<DeviceDescriptor>;

    /// Device by identifier.
    fn descriptor(&self, device_id: &str) -> Option<DeviceDescriptor>;

    /// Transport address of a device.
    fn device_address(&self, device_id: &str) -> Option<String> {
        self.descriptor(device_id).map(|d| d.address)
    }
}

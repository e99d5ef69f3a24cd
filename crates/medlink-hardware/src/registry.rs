//! Driver Registry
//!
//! Maps each [`DeviceModel`] to the driver that speaks its protocol. The
//! registry is built once, shared behind an `Arc`, and never mutated while
//! runs are in flight.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               DriverRegistry                 │
//! │  receivers: tbf210 → PrintoutDriver          │
//! │             dc320  → Dc320Driver     ...     │
//! │  senders:   fcp4521 → FukudaEcgSender ...    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Models that are known but have no driver (`ab29`, `cv20`, ...) resolve to
//! `None`; the orchestrator reports them as `IncompatibleDevice`.
//!
//! # Example
//!
//! ```rust
//! use medlink_core::DeviceModel;
//! use medlink_hardware::DriverRegistry;
//!
//! let registry = DriverRegistry::builtin();
//! assert!(registry.receiver(DeviceModel::Tm2580).is_some());
//! assert!(registry.receiver(DeviceModel::Ab29).is_none());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use medlink_core::{Archetype, DeviceModel, Driver, SendDriver};
use tracing::debug;

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A driver for the model is already registered.
    #[error("driver for '{0}' is already registered")]
    Duplicate(DeviceModel),

    /// Receive drivers cannot serve send-only models and vice versa.
    #[error("'{model}' is a {archetype} model and cannot take a {role} driver")]
    WrongRole {
        /// Model being registered.
        model: DeviceModel,
        /// Archetype of the model.
        archetype: &'static str,
        /// Role of the rejected driver.
        role: &'static str,
    },
}

/// Lookup table from model to driver.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    receivers: BTreeMap<DeviceModel, Arc<dyn Driver>>,
    senders: BTreeMap<DeviceModel, Arc<dyn SendDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("receivers", &self.receivers.keys().collect::<Vec<_>>())
            .field("senders", &self.senders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every driver shipped with medlink.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for driver in medlink_drivers::builtin_drivers() {
            if let Err(err) = registry.register(driver) {
                debug!(error = %err, "skipping builtin driver");
            }
        }
        for sender in medlink_drivers::builtin_senders() {
            if let Err(err) = registry.register_sender(sender) {
                debug!(error = %err, "skipping builtin sender");
            }
        }
        debug!(
            receivers = registry.receivers.len(),
            senders = registry.senders.len(),
            "driver registry built"
        );
        registry
    }

    /// Add a receive-side driver.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> Result<(), RegistryError> {
        let model = driver.model();
        if model.archetype() == Archetype::SendOnly {
            return Err(RegistryError::WrongRole {
                model,
                archetype: model.archetype().name(),
                role: "receive",
            });
        }
        if self.receivers.contains_key(&model) {
            return Err(RegistryError::Duplicate(model));
        }
        self.receivers.insert(model, driver);
        Ok(())
    }

    /// Add a send-only driver.
    pub fn register_sender(&mut self, sender: Arc<dyn SendDriver>) -> Result<(), RegistryError> {
        let model = sender.model();
        if model.archetype() != Archetype::SendOnly {
            return Err(RegistryError::WrongRole {
                model,
                archetype: model.archetype().name(),
                role: "send",
            });
        }
        if self.senders.contains_key(&model) {
            return Err(RegistryError::Duplicate(model));
        }
        self.senders.insert(model, sender);
        Ok(())
    }

    /// Receive-side driver for `model`.
    pub fn receiver(&self, model: DeviceModel) -> Option<Arc<dyn Driver>> {
        self.receivers.get(&model).cloned()
    }

    /// Send-only driver for `model`.
    pub fn sender(&self, model: DeviceModel) -> Option<Arc<dyn SendDriver>> {
        self.senders.get(&model).cloned()
    }

    /// Whether any driver serves `model`.
    pub fn supports(&self, model: DeviceModel) -> bool {
        self.receivers.contains_key(&model) || self.senders.contains_key(&model)
    }

    /// Every model with a driver, in label order.
    pub fn models(&self) -> Vec<DeviceModel> {
        let mut models: Vec<_> = self
            .receivers
            .keys()
            .chain(self.senders.keys())
            .copied()
            .collect();
        models.sort_by_key(|m| m.as_str());
        models
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.receivers.len() + self.senders.len()
    }

    /// Whether no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlink_drivers::{FukudaEcgSender, Tm2580Driver};

    #[test]
    fn builtin_covers_shipped_drivers() {
        let registry = DriverRegistry::builtin();
        assert_eq!(
            registry.len(),
            medlink_drivers::builtin_drivers().len() + medlink_drivers::builtin_senders().len()
        );
        assert!(registry.receiver(DeviceModel::Dc320).is_some());
        assert!(registry.sender(DeviceModel::QrConnectDr).is_some());
        assert!(registry.sender(DeviceModel::Dc320).is_none());
    }

    #[test]
    fn unimplemented_models_are_absent() {
        let registry = DriverRegistry::builtin();
        for model in [DeviceModel::Ab29, DeviceModel::Cv20, DeviceModel::Usm700Gsi] {
            assert!(!registry.supports(model), "{model}");
        }
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(Tm2580Driver)).unwrap();
        assert_eq!(
            registry.register(Arc::new(Tm2580Driver)),
            Err(RegistryError::Duplicate(DeviceModel::Tm2580))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn roles_are_checked() {
        let mut registry = DriverRegistry::new();
        registry
            .register_sender(Arc::new(FukudaEcgSender::fcp4521()))
            .unwrap();
        registry
            .register(Arc::new(medlink_drivers::Vs3000RecvDriver))
            .unwrap();
        assert_eq!(registry.models(), vec![DeviceModel::Fcp4521, DeviceModel::Vs3000Recv]);

        // model fixed to a receive archetype, offered as a sender
        struct Misplaced;
        impl SendDriver for Misplaced {
            fn model(&self) -> DeviceModel {
                DeviceModel::Tm2580
            }
            fn compose(
                &self,
                _params: &medlink_core::ValueVector,
            ) -> Result<Vec<u8>, medlink_core::ProtocolError> {
                Ok(Vec::new())
            }
        }
        assert!(matches!(
            registry.register_sender(Arc::new(Misplaced)),
            Err(RegistryError::WrongRole { role: "send", .. })
        ));
    }
}

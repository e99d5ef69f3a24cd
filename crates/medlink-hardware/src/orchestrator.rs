//! Measurement Orchestrator
//!
//! Turns a [`MeasurementRequest`] into a [`MeasurementResult`]:
//!
//! ```text
//!   request ─► DeviceDirectory ─► DriverRegistry ─► spawn_blocking
//!                 │ none              │ none          │  SessionGuard(transport)
//!                 ▼                   ▼               │  execute(driver, ctx)
//!        ConfigurationError   IncompatibleDevice      ▼
//!                                               close + result
//! ```
//!
//! # Single flight
//!
//! At most one run is in flight. [`Orchestrator::acquire`] and
//! [`Orchestrator::send`] wait for the permit; [`Orchestrator::try_acquire`]
//! fails fast with [`OrchestratorError::Busy`]. The permit is owned by the
//! blocking worker and released only after the transport is closed, so a
//! caller that stops awaiting does not free the link early.
//!
//! # Cancellation
//!
//! [`Orchestrator::cancel`] trips the active run's [`CancelToken`]. The
//! transport then returns empty reads, which the driver classifies as
//! `Cancelled`. The worker itself is never aborted.

use std::sync::Arc;

use medlink_core::{
    execute, transmit, CancelToken, DeviceDescriptor, DeviceDirectory, Driver, MeasurementContext,
    MeasurementRequest, MeasurementResult, ResultCode, RunLimits, SendDriver, Transport,
    TransportFactory, ValueVector,
};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::registry::DriverRegistry;

/// Orchestrator failures that are not measurement outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// Another run holds the single-flight permit.
    #[error("a measurement is already in progress")]
    Busy,
}

// =============================================================================
// Session Guard
// =============================================================================

/// Owns a transport for one run and closes it when dropped.
///
/// Dropping also happens while a panicking driver unwinds, so the link is
/// released on every path.
pub struct SessionGuard {
    transport: Box<dyn Transport>,
}

impl SessionGuard {
    /// Take ownership of `transport`.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Borrow the transport for the driver.
    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.transport.close();
        debug!("transport closed");
    }
}

/// Registration of the in-flight run's cancel token.
///
/// If the awaiting future is dropped before the worker returns, the run is
/// cancelled so the worker does not keep the link busy.
struct ActiveRun<'a> {
    slot: &'a Mutex<Option<CancelToken>>,
}

impl<'a> ActiveRun<'a> {
    fn register(slot: &'a Mutex<Option<CancelToken>>, token: CancelToken) -> Self {
        *slot.lock() = Some(token);
        Self { slot }
    }

    fn finish(self) {
        self.slot.lock().take();
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.slot.lock().take() {
            token.cancel();
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Single-flight measurement runner.
pub struct Orchestrator {
    directory: Arc<dyn DeviceDirectory>,
    registry: Arc<DriverRegistry>,
    transports: Arc<dyn TransportFactory>,
    limits: RunLimits,
    permit: Arc<AsyncMutex<()>>,
    active: Mutex<Option<CancelToken>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator over a device directory, driver registry and transport
    /// factory.
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        registry: Arc<DriverRegistry>,
        transports: Arc<dyn TransportFactory>,
        limits: RunLimits,
    ) -> Self {
        Self {
            directory,
            registry,
            transports,
            limits,
            permit: Arc::new(AsyncMutex::new(())),
            active: Mutex::new(None),
        }
    }

    /// Limits applied to every run.
    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// Whether a run holds the permit.
    pub fn is_busy(&self) -> bool {
        self.permit.try_lock().is_err()
    }

    /// Run one measurement, waiting for any in-flight run to finish first.
    #[instrument(skip_all, fields(form_id = request.form_id, sub_id = request.sub_id))]
    pub async fn acquire(&self, request: MeasurementRequest) -> MeasurementResult {
        let (descriptor, driver) = match self.resolve(&request) {
            Ok(found) => found,
            Err(code) => return MeasurementResult::failed(code),
        };
        let permit = Arc::clone(&self.permit).lock_owned().await;
        self.run_receiver(permit, descriptor, driver, request).await
    }

    /// Like [`Orchestrator::acquire`], but refuses to wait for the permit.
    pub async fn try_acquire(
        &self,
        request: MeasurementRequest,
    ) -> Result<MeasurementResult, OrchestratorError> {
        let permit = Arc::clone(&self.permit)
            .try_lock_owned()
            .map_err(|_| OrchestratorError::Busy)?;
        let result = match self.resolve(&request) {
            Ok((descriptor, driver)) => {
                self.run_receiver(permit, descriptor, driver, request).await
            }
            Err(code) => MeasurementResult::failed(code),
        };
        Ok(result)
    }

    /// Transmit patient metadata to a send-only device.
    #[instrument(skip(self, params))]
    pub async fn send(&self, device_id: &str, params: ValueVector) -> ResultCode {
        let Some(descriptor) = self.directory.descriptor(device_id) else {
            warn!("no such device");
            return ResultCode::ConfigurationError;
        };
        let Some(sender) = self.registry.sender(descriptor.model) else {
            warn!(model = %descriptor.model, "no send driver for model");
            return ResultCode::IncompatibleDevice;
        };

        let permit = Arc::clone(&self.permit).lock_owned().await;
        let transport = self.transports.create();
        let active = ActiveRun::register(&self.active, transport.cancel_token());
        let ctx = MeasurementContext::with_limits(descriptor.address.clone(), params, &self.limits);

        let joined = tokio::task::spawn_blocking(move || {
            // Declared first so it drops after the session closes.
            let _permit = permit;
            let mut session = SessionGuard::new(transport);
            transmit(sender.as_ref(), session.transport(), &ctx)
        })
        .await;
        active.finish();

        let code = joined.unwrap_or_else(|err| {
            error!(error = %err, "send worker failed");
            ResultCode::MeasurementError
        });
        info!(%code, device = %descriptor.id, "send finished");
        code
    }

    /// Cancel the in-flight run, if any. Returns whether a run was signalled.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(token) => {
                token.cancel();
                info!("cancellation requested");
                true
            }
            None => false,
        }
    }

    fn resolve(
        &self,
        request: &MeasurementRequest,
    ) -> Result<(DeviceDescriptor, Arc<dyn Driver>), ResultCode> {
        let Some(descriptor) = self
            .directory
            .resolve_device(request.form_id, request.sub_id)
        else {
            warn!("no device mapped to item");
            return Err(ResultCode::ConfigurationError);
        };
        let Some(driver) = self.registry.receiver(descriptor.model) else {
            warn!(device = %descriptor.id, model = %descriptor.model, "no driver for model");
            return Err(ResultCode::IncompatibleDevice);
        };
        Ok((descriptor, driver))
    }

    async fn run_receiver(
        &self,
        permit: OwnedMutexGuard<()>,
        descriptor: DeviceDescriptor,
        driver: Arc<dyn Driver>,
        request: MeasurementRequest,
    ) -> MeasurementResult {
        debug!(
            device = %descriptor.id,
            model = %descriptor.model,
            address = %descriptor.address,
            "starting run"
        );
        let transport = self.transports.create();
        let active = ActiveRun::register(&self.active, transport.cancel_token());
        let ctx =
            MeasurementContext::with_limits(descriptor.address.clone(), request.params, &self.limits)
                .form(request.form_id)
                .strictness(descriptor.strictness);

        let joined = tokio::task::spawn_blocking(move || {
            // Declared first so it drops after the session closes.
            let _permit = permit;
            let mut session = SessionGuard::new(transport);
            let mut ctx = ctx;
            let code = execute(driver.as_ref(), session.transport(), &mut ctx);
            (code, ctx.values)
        })
        .await;
        active.finish();

        let result = match joined {
            Ok((code, mut values)) => {
                if code == ResultCode::Success {
                    values.trim_all();
                }
                MeasurementResult { values, code }
            }
            Err(err) => {
                error!(error = %err, "measurement worker failed");
                MeasurementResult::failed(ResultCode::MeasurementError)
            }
        };
        info!(code = %result.code, device = %descriptor.id, "measurement finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use medlink_mock::{Script, ScriptedFactory, ScriptedTransport};

    fn orchestrator(script: Script) -> (Orchestrator, ScriptedFactory) {
        let config = HardwareConfig::from_toml_str(
            r#"
            [[devices]]
            id = "bp"
            model = "tm2580"
            address = "/dev/ttyUSB0"

            [[items]]
            form_id = 7
            device = "bp"
            "#,
        )
        .unwrap();
        let factory = ScriptedFactory::new(script);
        let orchestrator = Orchestrator::new(
            Arc::new(config),
            Arc::new(DriverRegistry::builtin()),
            Arc::new(factory.clone()),
            RunLimits::default(),
        );
        (orchestrator, factory)
    }

    #[test]
    fn session_guard_closes_on_drop() {
        let transport = ScriptedTransport::new(Script::new());
        let probe = transport.probe();
        {
            let mut guard = SessionGuard::new(Box::new(transport));
            guard.transport().connect("addr");
        }
        assert_eq!(probe.closes(), 1);
        assert_eq!(probe.released(), 1);
    }

    #[test]
    fn dropped_run_cancels_token() {
        let slot = Mutex::new(None);
        let token = CancelToken::new();
        drop(ActiveRun::register(&slot, token.clone()));
        assert!(token.is_cancelled());

        let token = CancelToken::new();
        ActiveRun::register(&slot, token.clone()).finish();
        assert!(!token.is_cancelled());
        assert!(slot.lock().is_none());
    }

    #[tokio::test]
    async fn unmapped_item_never_creates_transport() {
        let (orchestrator, factory) = orchestrator(Script::new());
        let result = orchestrator.acquire(MeasurementRequest::new(8, 0, &[""])).await;
        assert_eq!(result.code, ResultCode::ConfigurationError);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn cancel_without_run_is_noop() {
        let (orchestrator, _) = orchestrator(Script::new());
        assert!(!orchestrator.cancel());
        assert!(!orchestrator.is_busy());
    }
}

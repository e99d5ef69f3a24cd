//! Driver contracts and the driver boundary.
//!
//! A receive-side [`Driver`] is a small state machine over a blocking
//! [`Transport`]. It reads its inputs from a request-scoped
//! [`MeasurementContext`], writes value slots into the same context and
//! returns the final [`ResultCode`] explicitly. Every step returns
//! `Result<_, ProtocolError>`; [`execute`] is the only place those errors are
//! turned into result codes.
//!
//! ```text
//!   Orchestrator ──► execute(driver, transport, ctx)
//!                       │ clear ctx.values
//!                       │ driver.run(transport, ctx) ──► Channel ──► Transport
//!                       │      Ok(code)  ─────────────► code
//!                       │      Err(e)    ─────────────► e.result_code()
//!                       ▼
//!                    ResultCode
//! ```
//!
//! Transmit-only instruments implement [`SendDriver`] instead: composing the
//! outgoing record is pure, and [`transmit`] performs connect, send and the
//! settle delay.

use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::codec::{self, control};
use crate::error::ProtocolError;
use crate::model::{Archetype, DeviceModel, Frame, ResultCode, Strictness, ValueVector};
use crate::transport::{CancelToken, Transport, TransportStatus};

/// Default receive buffer size.
pub const DEFAULT_FRAME_CAPACITY: usize = 1000;

/// Default settle delay after a transmit-only write.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

// =============================================================================
// Limits and Budget
// =============================================================================

/// Bounds applied to every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Maximum receive-loop exchanges per run.
    pub max_exchanges: usize,
    /// Wall-clock limit for receive loops.
    pub deadline: Option<Duration>,
    /// Overrides each sender's settle delay.
    pub settle: Option<Duration>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_exchanges: 64,
            deadline: None,
            settle: None,
        }
    }
}

/// Counts receive-loop exchanges against [`RunLimits`].
#[derive(Debug, Clone)]
pub struct ExchangeBudget {
    max_exchanges: usize,
    deadline: Option<Instant>,
    used: usize,
}

impl ExchangeBudget {
    /// Budget starting now.
    pub fn new(limits: &RunLimits) -> Self {
        Self {
            max_exchanges: limits.max_exchanges,
            deadline: limits.deadline.map(|d| Instant::now() + d),
            used: 0,
        }
    }

    /// Consume one exchange.
    pub fn tick(&mut self) -> Result<(), ProtocolError> {
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if self.used >= self.max_exchanges || expired {
            return Err(ProtocolError::BudgetExhausted {
                exchanges: self.used,
            });
        }
        self.used += 1;
        Ok(())
    }

    /// Exchanges consumed so far.
    pub fn used(&self) -> usize {
        self.used
    }
}

// =============================================================================
// Measurement Context
// =============================================================================

/// Request-scoped state owned by a single run.
#[derive(Debug, Clone)]
pub struct MeasurementContext {
    /// Transport address of the device.
    pub address: String,
    /// Examination form identifier.
    pub form_id: u32,
    /// Parameters, 14 slots.
    pub params: ValueVector,
    /// Values written by the driver, 14 slots.
    pub values: ValueVector,
    /// Per-device override; the driver default applies when `None`.
    pub strictness: Option<Strictness>,
    /// Receive-loop budget.
    pub budget: ExchangeBudget,
    /// Settle delay override for transmit-only drivers.
    pub settle: Option<Duration>,
}

impl MeasurementContext {
    /// Context with default limits.
    pub fn new(address: impl Into<String>, params: ValueVector) -> Self {
        Self::with_limits(address, params, &RunLimits::default())
    }

    /// Context with explicit limits.
    pub fn with_limits(
        address: impl Into<String>,
        params: ValueVector,
        limits: &RunLimits,
    ) -> Self {
        Self {
            address: address.into(),
            form_id: 0,
            params,
            values: ValueVector::new(),
            strictness: None,
            budget: ExchangeBudget::new(limits),
            settle: limits.settle,
        }
    }

    /// Set the examination form.
    pub fn form(mut self, form_id: u32) -> Self {
        self.form_id = form_id;
        self
    }

    /// Set the strictness override.
    pub fn strictness(mut self, strictness: Option<Strictness>) -> Self {
        self.strictness = strictness;
        self
    }

    /// Parameter slot, trimmed.
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).trim()
    }

    /// Whether malformed values should be tolerated.
    pub fn is_lenient(&self) -> bool {
        self.strictness == Some(Strictness::Lenient)
    }
}

// =============================================================================
// Driver Traits
// =============================================================================

/// Receive-side instrument driver.
pub trait Driver: Send + Sync {
    /// Model this driver instance serves.
    fn model(&self) -> DeviceModel;

    /// Protocol archetype.
    fn archetype(&self) -> Archetype {
        self.model().archetype()
    }

    /// Strictness used when the device configuration does not override it.
    fn default_strictness(&self) -> Strictness {
        Strictness::Strict
    }

    /// Run the protocol and fill `ctx.values`.
    ///
    /// Returns the final code explicitly; only a driver's last step may
    /// return [`ResultCode::Success`].
    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError>;
}

/// Transmit-only driver for instruments that accept patient metadata.
pub trait SendDriver: Send + Sync {
    /// Model this sender serves.
    fn model(&self) -> DeviceModel;

    /// Outgoing record for the given parameters.
    fn compose(&self, params: &ValueVector) -> Result<Vec<u8>, ProtocolError>;

    /// Delay after the write before the link may be closed.
    fn settle(&self) -> Duration {
        DEFAULT_SETTLE
    }
}

// =============================================================================
// Boundary
// =============================================================================

/// Run a receive-side driver and classify its outcome.
///
/// Clears `ctx.values` first and resolves the strictness default. Step errors
/// are mapped with [`ProtocolError::result_code`].
#[instrument(skip_all, fields(model = %driver.model(), archetype = driver.archetype().name()))]
pub fn execute(
    driver: &dyn Driver,
    transport: &mut dyn Transport,
    ctx: &mut MeasurementContext,
) -> ResultCode {
    ctx.values.clear();
    if ctx.strictness.is_none() {
        ctx.strictness = Some(driver.default_strictness());
    }

    match driver.run(transport, ctx) {
        Ok(code) => {
            debug!(%code, exchanges = ctx.budget.used(), "driver finished");
            code
        }
        Err(err) => {
            let code = err.result_code();
            warn!(error = %err, %code, "driver step failed");
            code
        }
    }
}

/// Transmit patient metadata with a send-only driver.
///
/// Connects, writes the composed record, waits for the settle delay and maps
/// the transport status. No response is read.
#[instrument(skip_all, fields(model = %driver.model()))]
pub fn transmit(
    driver: &dyn SendDriver,
    transport: &mut dyn Transport,
    ctx: &MeasurementContext,
) -> ResultCode {
    let payload = match driver.compose(&ctx.params) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "cannot compose record");
            return err.result_code();
        }
    };

    let status = transport.connect(&ctx.address);
    if !status.is_success() {
        warn!(%status, address = %ctx.address, "connect failed");
        return status.into();
    }

    let status = transport.send(&payload);
    debug!(%status, len = payload.len(), "record sent");
    std::thread::sleep(ctx.settle.unwrap_or_else(|| driver.settle()));
    status.into()
}

// =============================================================================
// Channel
// =============================================================================

/// Driver-side view of a transport with a reusable receive frame.
///
/// Converts non-success statuses and empty reads into [`ProtocolError`]s so
/// driver steps can use `?`.
pub struct Channel<'a> {
    transport: &'a mut dyn Transport,
    frame: Frame,
    status: TransportStatus,
    cancel: CancelToken,
}

impl<'a> Channel<'a> {
    /// Channel with a receive frame of `capacity` bytes.
    pub fn new(transport: &'a mut dyn Transport, capacity: usize) -> Self {
        let cancel = transport.cancel_token();
        Self {
            transport,
            frame: Frame::with_capacity(capacity),
            status: TransportStatus::Success,
            cancel,
        }
    }

    /// Connect to `address`.
    pub fn connect(&mut self, address: &str) -> Result<(), ProtocolError> {
        self.status = self.transport.connect(address);
        if !self.status.is_success() {
            return Err(ProtocolError::Transport(self.status));
        }
        debug!(address, "connected");
        Ok(())
    }

    /// Write raw bytes.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let status = self.transport.send(bytes);
        if !status.is_success() {
            self.status = status;
            return Err(ProtocolError::Transport(status));
        }
        Ok(())
    }

    /// Write single-byte encoded text.
    pub fn send_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.send(&codec::encode(text))
    }

    /// Read once into the frame; zero bytes is [`ProtocolError::EmptyRead`].
    pub fn receive(&mut self, step: &'static str) -> Result<&mut Frame, ProtocolError> {
        self.read(step, None)
    }

    /// Read until CRLF; zero bytes is [`ProtocolError::EmptyRead`].
    pub fn receive_line(&mut self, step: &'static str) -> Result<&mut Frame, ProtocolError> {
        self.read(step, Some(control::CRLF))
    }

    /// Read once and return the frame even when it is empty.
    pub fn receive_any(&mut self) -> &Frame {
        self.fill(None);
        &self.frame
    }

    /// Send `command` + CRLF and require a CRLF-bounded reply starting with `expect`.
    ///
    /// Returns the reply text.
    pub fn command(
        &mut self,
        step: &'static str,
        command: &str,
        expect: &str,
    ) -> Result<String, ProtocolError> {
        self.send_text(&format!("{command}\r\n"))?;
        let reply = self.receive_line(step)?.text();
        if !reply.starts_with(expect) {
            return Err(ProtocolError::UnexpectedReply {
                step,
                expected: expect.to_string(),
                actual: reply.trim_end().to_string(),
            });
        }
        debug!(step, reply = reply.trim_end(), "step acknowledged");
        Ok(reply)
    }

    /// Most recent frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Status of the most recent connect or receive.
    pub fn status(&self) -> TransportStatus {
        self.status
    }

    /// Final code for a completed run: the last transport status.
    pub fn finish(&self) -> ResultCode {
        self.status.into()
    }

    /// Whether the owner requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn read(
        &mut self,
        step: &'static str,
        terminator: Option<&[u8]>,
    ) -> Result<&mut Frame, ProtocolError> {
        self.fill(terminator);
        if self.frame.is_empty() {
            return Err(ProtocolError::EmptyRead { step });
        }
        Ok(&mut self.frame)
    }

    fn fill(&mut self, terminator: Option<&[u8]>) {
        self.frame.reset();
        let reception = if self.cancel.is_cancelled() {
            crate::transport::Reception::empty(TransportStatus::Failed)
        } else {
            self.transport.receive(self.frame.buffer_mut(), terminator)
        };
        self.status = reception.status;
        self.frame.set_len(reception.len);
        debug!(len = reception.len, status = %reception.status, "received");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct Script {
        replies: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        cancel: CancelToken,
        connect: TransportStatus,
    }

    impl Script {
        fn new(replies: &[&[u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_vec()).collect(),
                sent: Vec::new(),
                cancel: CancelToken::new(),
                connect: TransportStatus::Success,
            }
        }
    }

    impl Transport for Script {
        fn connect(&mut self, _address: &str) -> TransportStatus {
            self.connect
        }

        fn send(&mut self, bytes: &[u8]) -> TransportStatus {
            self.sent.push(bytes.to_vec());
            TransportStatus::Success
        }

        fn receive(&mut self, buf: &mut [u8], _terminator: Option<&[u8]>) -> crate::Reception {
            match self.replies.pop_front() {
                Some(reply) => {
                    let len = reply.len().min(buf.len());
                    buf[..len].copy_from_slice(&reply[..len]);
                    crate::Reception::data(len)
                }
                None => crate::Reception::empty(TransportStatus::Failed),
            }
        }

        fn cancel_token(&self) -> CancelToken {
            self.cancel.clone()
        }

        fn close(&mut self) {}
    }

    struct Echo;

    impl Driver for Echo {
        fn model(&self) -> DeviceModel {
            DeviceModel::Bh100
        }

        fn run(
            &self,
            transport: &mut dyn Transport,
            ctx: &mut MeasurementContext,
        ) -> Result<ResultCode, ProtocolError> {
            let mut channel = Channel::new(transport, 64);
            channel.connect(&ctx.address)?;
            let text = channel.receive("value")?.text();
            ctx.values.set(1, text);
            Ok(channel.finish())
        }
    }

    struct Fixed;

    impl SendDriver for Fixed {
        fn model(&self) -> DeviceModel {
            DeviceModel::QrConnect
        }

        fn compose(&self, params: &ValueVector) -> Result<Vec<u8>, ProtocolError> {
            Ok(params.get(1).as_bytes().to_vec())
        }
    }

    #[test]
    fn budget_expires_into_cancelled() {
        let mut budget = ExchangeBudget::new(&RunLimits {
            max_exchanges: 2,
            ..RunLimits::default()
        });
        assert!(budget.tick().is_ok());
        assert!(budget.tick().is_ok());
        let err = budget.tick().unwrap_err();
        assert_eq!(err, ProtocolError::BudgetExhausted { exchanges: 2 });
        assert_eq!(err.result_code(), ResultCode::Cancelled);
    }

    #[test]
    fn budget_honours_deadline() {
        let mut budget = ExchangeBudget::new(&RunLimits {
            deadline: Some(Duration::ZERO),
            ..RunLimits::default()
        });
        assert!(budget.tick().is_err());
    }

    #[test]
    fn execute_clears_values_and_returns_code() {
        let mut transport = Script::new(&[b"158.9"]);
        let mut ctx = MeasurementContext::new("addr", ValueVector::new());
        ctx.values.set(5, "stale");
        let code = execute(&Echo, &mut transport, &mut ctx);
        assert_eq!(code, ResultCode::Success);
        assert_eq!(ctx.values.get(1), "158.9");
        assert_eq!(ctx.values.get(5), "");
        assert_eq!(ctx.strictness, Some(Strictness::Strict));
    }

    #[test]
    fn execute_maps_empty_read_to_cancelled() {
        let mut transport = Script::new(&[]);
        let mut ctx = MeasurementContext::new("addr", ValueVector::new());
        assert_eq!(execute(&Echo, &mut transport, &mut ctx), ResultCode::Cancelled);
        assert!(ctx.values.iter().all(str::is_empty));
    }

    #[test]
    fn execute_maps_connect_failure() {
        let mut transport = Script::new(&[b"1"]);
        transport.connect = TransportStatus::Unsupported;
        let mut ctx = MeasurementContext::new("addr", ValueVector::new());
        assert_eq!(execute(&Echo, &mut transport, &mut ctx), ResultCode::Unsupported);
    }

    #[test]
    fn channel_returns_empty_after_cancel() {
        let mut transport = Script::new(&[b"data"]);
        transport.cancel.cancel();
        let mut channel = Channel::new(&mut transport, 16);
        assert!(channel.is_cancelled());
        assert!(matches!(
            channel.receive("wait"),
            Err(ProtocolError::EmptyRead { step: "wait" })
        ));
    }

    #[test]
    fn command_checks_reply_prefix() {
        let mut transport = Script::new(&[b"D0,Pt,1.0\r\n", b"D0,Pt,2.0\r\n"]);
        let mut channel = Channel::new(&mut transport, 64);
        assert!(channel.command("tare", "D001.0", "D0,Pt,1.0").is_ok());
        let err = channel.command("tare", "D001.0", "D0,Pt,1.0").unwrap_err();
        assert_eq!(err.result_code(), ResultCode::Cancelled);
        drop(channel);
        assert_eq!(transport.sent[0], b"D001.0\r\n");
    }

    #[test]
    fn transmit_sends_composed_record() {
        let mut transport = Script::new(&[]);
        let params = ValueVector::from_slice(&["", "000123"]);
        let ctx = MeasurementContext::with_limits(
            "addr",
            params,
            &RunLimits {
                settle: Some(Duration::ZERO),
                ..RunLimits::default()
            },
        );
        assert_eq!(transmit(&Fixed, &mut transport, &ctx), ResultCode::Success);
        assert_eq!(transport.sent, vec![b"000123".to_vec()]);
    }

    #[test]
    fn transmit_skips_send_when_connect_fails() {
        let mut transport = Script::new(&[]);
        transport.connect = TransportStatus::Failed;
        let ctx = MeasurementContext::new("addr", ValueVector::new());
        assert_eq!(transmit(&Fixed, &mut transport, &ctx), ResultCode::DeviceFailed);
        assert!(transport.sent.is_empty());
    }
}

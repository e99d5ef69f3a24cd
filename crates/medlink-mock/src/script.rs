//! Scripted transport.
//!
//! A [`ScriptedTransport`] replays a fixed sequence of receptions and records
//! everything the driver sends. The [`TransportProbe`] shares that record with
//! the test, so the transport itself can be moved into a worker.
//!
//! ```text
//!   Script: [Reply(b"@\r\n"), Reply(b"D0,Pt,1.0\r\n"), Silence, ...]
//!             │
//!             ▼  receive() pops one step per call
//!   ScriptedTransport ──► TransportProbe { connects, sends, receives, closes }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use medlink_core::{CancelToken, Reception, Transport, TransportFactory, TransportStatus};

use crate::mode::{MockMode, TimingConfig};

/// Upper bound on how long [`Step::Hang`] blocks without a cancel.
const HANG_LIMIT: Duration = Duration::from_secs(10);

// =============================================================================
// Script
// =============================================================================

/// One scripted reception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Deliver these bytes (truncated to the receive buffer).
    Reply(Vec<u8>),
    /// Zero bytes with `TransportStatus::Success` (read timeout).
    Silence,
    /// Zero bytes with the given status.
    Fail(TransportStatus),
    /// Block until cancelled, then return zero bytes.
    Hang,
}

/// Ordered receptions plus connect/send outcomes.
#[derive(Debug, Clone)]
pub struct Script {
    steps: VecDeque<Step>,
    connect: TransportStatus,
    send: TransportStatus,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            steps: VecDeque::new(),
            connect: TransportStatus::Success,
            send: TransportStatus::Success,
        }
    }
}

impl Script {
    /// Empty script; every receive returns zero bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script replying with each frame in order.
    pub fn replies<B: AsRef<[u8]>>(frames: &[B]) -> Self {
        frames
            .iter()
            .fold(Self::new(), |script, frame| script.reply(frame.as_ref()))
    }

    /// Append a reply.
    pub fn reply(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.steps.push_back(Step::Reply(bytes.as_ref().to_vec()));
        self
    }

    /// Append a CRLF-terminated text reply.
    pub fn line(self, text: &str) -> Self {
        self.reply(format!("{text}\r\n"))
    }

    /// Append an arbitrary step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push_back(step);
        self
    }

    /// Status returned by `connect`.
    pub fn connect_status(mut self, status: TransportStatus) -> Self {
        self.connect = status;
        self
    }

    /// Status returned by every `send`.
    pub fn send_status(mut self, status: TransportStatus) -> Self {
        self.send = status;
        self
    }

    /// Remaining steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps remain.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// =============================================================================
// Probe
// =============================================================================

#[derive(Debug, Default)]
struct ProbeState {
    connects: Vec<String>,
    sends: Vec<Vec<u8>>,
    receives: usize,
    closes: usize,
    released: usize,
}

/// Shared record of what happened on a scripted transport.
#[derive(Debug, Clone, Default)]
pub struct TransportProbe(Arc<Mutex<ProbeState>>);

impl TransportProbe {
    /// Addresses passed to `connect`.
    pub fn connects(&self) -> Vec<String> {
        self.0.lock().connects.clone()
    }

    /// Payloads passed to `send`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.0.lock().sends.clone()
    }

    /// Number of `receive` calls.
    pub fn receives(&self) -> usize {
        self.0.lock().receives
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> usize {
        self.0.lock().closes
    }

    /// Number of `close` calls that released an open link.
    pub fn released(&self) -> usize {
        self.0.lock().released
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Deterministic [`Transport`] replaying a [`Script`].
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Script,
    mode: MockMode,
    timing: TimingConfig,
    cancel: CancelToken,
    probe: TransportProbe,
    open: bool,
}

impl ScriptedTransport {
    /// Transport in [`MockMode::Instant`].
    pub fn new(script: Script) -> Self {
        Self::with_mode(script, MockMode::Instant)
    }

    /// Transport in the given mode.
    pub fn with_mode(script: Script, mode: MockMode) -> Self {
        Self {
            script,
            mode,
            timing: TimingConfig::default(),
            cancel: CancelToken::new(),
            probe: TransportProbe::default(),
            open: false,
        }
    }

    /// Replace the realistic-mode timing.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Record into an existing probe.
    pub fn probe_into(mut self, probe: TransportProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Handle for inspecting sends and closes.
    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }

    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn hang(&self) -> Reception {
        let started = Instant::now();
        while !self.cancel.is_cancelled() && started.elapsed() < HANG_LIMIT {
            std::thread::sleep(Duration::from_millis(2));
        }
        Reception::empty(TransportStatus::Failed)
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, address: &str) -> TransportStatus {
        self.pause(self.timing.connect_delay(self.mode));
        self.probe.0.lock().connects.push(address.to_string());
        self.open = self.script.connect.is_success();
        self.script.connect
    }

    fn send(&mut self, bytes: &[u8]) -> TransportStatus {
        self.pause(self.timing.call_delay(self.mode));
        self.probe.0.lock().sends.push(bytes.to_vec());
        self.script.send
    }

    fn receive(&mut self, buf: &mut [u8], _terminator: Option<&[u8]>) -> Reception {
        self.pause(self.timing.call_delay(self.mode));
        self.probe.0.lock().receives += 1;

        if self.cancel.is_cancelled() {
            return Reception::empty(TransportStatus::Failed);
        }

        match self.script.steps.pop_front() {
            Some(Step::Reply(bytes)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                debug!(len, "scripted reply");
                Reception::data(len)
            }
            Some(Step::Fail(status)) => Reception::empty(status),
            Some(Step::Hang) => self.hang(),
            Some(Step::Silence) | None => Reception::empty(TransportStatus::Success),
        }
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn close(&mut self) {
        let mut state = self.probe.0.lock();
        state.closes += 1;
        if self.open {
            self.open = false;
            state.released += 1;
        }
    }
}

/// Factory producing a fresh [`ScriptedTransport`] per run.
///
/// Every transport replays the same script and records into the same probe.
#[derive(Debug, Clone)]
pub struct ScriptedFactory {
    script: Script,
    mode: MockMode,
    timing: TimingConfig,
    probe: TransportProbe,
    created: Arc<Mutex<usize>>,
}

impl ScriptedFactory {
    /// Factory replaying `script` in [`MockMode::Instant`].
    pub fn new(script: Script) -> Self {
        Self {
            script,
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            probe: TransportProbe::default(),
            created: Arc::new(Mutex::new(0)),
        }
    }

    /// Change the timing mode of created transports.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Change the realistic-mode timing of created transports.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Shared probe of every created transport.
    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }

    /// Number of transports created.
    pub fn created(&self) -> usize {
        *self.created.lock()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn Transport> {
        *self.created.lock() += 1;
        let transport = ScriptedTransport::with_mode(self.script.clone(), self.mode)
            .timing(self.timing)
            .probe_into(self.probe.clone());
        Box::new(transport)
    }
}

//! Blocking byte-stream transport contract.
//!
//! Drivers run on a dedicated worker and call the transport synchronously.
//! Cancellation is cooperative: [`Transport::cancel`] flips a shared
//! [`CancelToken`], and implementations must make any in-flight or later
//! `receive` return zero bytes once it is set.
//!
//! # Implementations
//!
//! - `medlink_hardware::serial::SerialTransport` (real serial ports)
//! - `medlink_mock::ScriptedTransport` (tests and dry runs)

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Status reported by every transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// Operation completed.
    Success,
    /// Device could not be reached or configured.
    Failed,
    /// The underlying driver failed.
    DriverError,
    /// Operation not supported by this transport.
    Unsupported,
}

impl TransportStatus {
    /// Whether the status is [`TransportStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, TransportStatus::Success)
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportStatus::Success => "success",
            TransportStatus::Failed => "failed",
            TransportStatus::DriverError => "driver_error",
            TransportStatus::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// Outcome of a receive: status plus number of bytes written to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reception {
    /// Transport status.
    pub status: TransportStatus,
    /// Bytes written; zero means nothing was read.
    pub len: usize,
}

impl Reception {
    /// Successful read of `len` bytes.
    pub fn data(len: usize) -> Self {
        Self {
            status: TransportStatus::Success,
            len,
        }
    }

    /// Nothing read.
    pub fn empty(status: TransportStatus) -> Self {
        Self { status, len: 0 }
    }
}

/// Shared cancellation flag between a transport and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocking transport used by drivers.
pub trait Transport: Send {
    /// Open the link to `address`.
    fn connect(&mut self, address: &str) -> TransportStatus;

    /// Write all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> TransportStatus;

    /// Read into `buf`.
    ///
    /// Without a terminator, returns whatever one read yields. With a
    /// terminator, reads until the buffer ends with it or the buffer is full.
    fn receive(&mut self, buf: &mut [u8], terminator: Option<&[u8]>) -> Reception;

    /// Token shared with the owner of the transport.
    fn cancel_token(&self) -> CancelToken;

    /// Best-effort abort of an in-flight receive.
    fn cancel(&self) {
        self.cancel_token().cancel();
    }

    /// Release the link. Idempotent.
    fn close(&mut self);
}

/// Creates a fresh transport for each run.
pub trait TransportFactory: Send + Sync {
    /// New, unconnected transport.
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn reception_constructors() {
        assert_eq!(Reception::data(5).len, 5);
        assert!(Reception::data(5).status.is_success());
        let empty = Reception::empty(TransportStatus::Failed);
        assert_eq!(empty.len, 0);
        assert_eq!(empty.status.to_string(), "failed");
    }
}

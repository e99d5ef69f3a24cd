//! Command/expected-reply engine for PC-mode instruments.
//!
//! ```text
//!   for step in steps:
//!       send  "<command>\r\n"
//!       recv  line (CRLF)          zero bytes     -> EmptyRead       -> Cancelled
//!       check reply.starts_with(expect)   no      -> UnexpectedReply -> Cancelled
//!   wait_for_marker: recv lines until one starts with the marker (budgeted)
//!   skip_lines:      recv and discard a fixed number of lines
//! ```
//!
//! Steps never retry: the first mismatch ends the run.

use medlink_core::{Channel, ExchangeBudget, ProtocolError};
use tracing::debug;

/// One command and the reply prefix that acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeStep {
    /// Step name used in logs and errors.
    pub name: &'static str,
    /// Command text, sent with a CRLF terminator.
    pub command: String,
    /// Required reply prefix.
    pub expect: &'static str,
}

impl HandshakeStep {
    /// Build a step.
    pub fn new(name: &'static str, command: impl Into<String>, expect: &'static str) -> Self {
        Self {
            name,
            command: command.into(),
            expect,
        }
    }
}

/// Run `steps` in order, stopping at the first failure.
pub fn run_steps(channel: &mut Channel<'_>, steps: &[HandshakeStep]) -> Result<(), ProtocolError> {
    for step in steps {
        channel.command(step.name, &step.command, step.expect)?;
    }
    Ok(())
}

/// Receive CRLF lines until one starts with `marker`; returns that line.
///
/// Each line consumes one unit of `budget`.
pub fn wait_for_marker(
    channel: &mut Channel<'_>,
    budget: &mut ExchangeBudget,
    step: &'static str,
    marker: &str,
) -> Result<String, ProtocolError> {
    loop {
        budget.tick()?;
        let line = channel.receive_line(step)?.text();
        if line.starts_with(marker) {
            return Ok(line);
        }
        debug!(step, marker, len = line.len(), "skipping frame");
    }
}

/// Receive and discard `count` CRLF lines. An empty read ends the run.
pub fn skip_lines(
    channel: &mut Channel<'_>,
    step: &'static str,
    count: usize,
) -> Result<(), ProtocolError> {
    for _ in 0..count {
        channel.receive_line(step)?;
    }
    debug!(step, count, "lines skipped");
    Ok(())
}

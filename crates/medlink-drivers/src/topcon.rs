//! Topcon TX-20P tonometer.
//!
//! The tonometer announces itself with ENQ, then sends print-out lines until
//! EOT. Every line and the ENQ are acknowledged with `ACK CR`. The result line
//! carries a `RIGHT/LEFT` header followed by 21-character blocks; the first
//! bracketed block holds the averaged readings:
//!
//! ```text
//!    RIGHT     LEFT    C [ 15.8      13.7 ] C [ ...
//!   ^i                   ^i+22            ^i+39
//! ```

use medlink_core::codec::{char_index, control, parse_decimal, window_at};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
};
use tracing::{debug, info};

const HEADER: &str = "  RIGHT     LEFT    ";
const ACK_CR: [u8; 2] = [control::ACK, b'\r'];

/// Block geometry relative to the header.
const FIRST_OPEN: usize = 22;
const FIRST_CLOSE: usize = 39;
const BLOCK_WIDTH: usize = 21;
const MAX_BLOCKS: usize = 10;

/// Topcon TX-20P. Right eye in slot 1, left eye in slot 2, rounded to whole
/// mmHg; an eye without a reading reports `"0"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tx20PDriver;

impl Tx20PDriver {
    fn rounded(field: &'static str, raw: Option<String>) -> Result<String, ProtocolError> {
        let raw = raw.unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(String::new());
        }
        let value = parse_decimal(&raw).ok_or_else(|| ProtocolError::rejected(field, raw.clone()))?;
        Ok(format!("{:.0}", value.round()))
    }

    /// Right and left readings from a result line, if it carries the header
    /// and a bracketed block.
    pub fn readings(text: &str) -> Result<Option<(String, String)>, ProtocolError> {
        let Some(header) = char_index(text, HEADER).filter(|&i| i > 0) else {
            return Ok(None);
        };
        for block in 0..MAX_BLOCKS {
            let open = header + FIRST_OPEN + block * BLOCK_WIDTH;
            let close = header + FIRST_CLOSE + block * BLOCK_WIDTH;
            let bracketed = window_at(text, open, 1).as_deref() == Some("[")
                && window_at(text, close, 1).as_deref() == Some("]");
            if bracketed {
                let right = Self::rounded("right", window_at(text, open + 2, 4))?;
                let left = Self::rounded("left", window_at(text, open + 12, 4))?;
                return Ok(Some((right, left)));
            }
        }
        Ok(Some((String::new(), String::new())))
    }
}

impl Driver for Tx20PDriver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Tx20P
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        if !channel.receive("enquiry")?.contains(control::ENQ) {
            return Err(ProtocolError::UnexpectedReply {
                step: "enquiry",
                expected: "ENQ".into(),
                actual: channel.frame().text(),
            });
        }
        channel.send(&ACK_CR)?;

        let (mut right, mut left) = (String::new(), String::new());
        loop {
            ctx.budget.tick()?;
            let text = channel.receive("print_out")?.text().replace('\n', "");

            if let Some((r, l)) = Self::readings(&text)? {
                debug!(right = %r, left = %l, "result line");
                right = r;
                left = l;
                channel.send(&ACK_CR)?;
            }
            if text.contains(char::from(control::EOT)) {
                channel.send(&ACK_CR)?;
                break;
            }
        }

        let or_zero = |v: String| if v.is_empty() { "0".to_string() } else { v };
        let (right, left) = (or_zero(right), or_zero(left));
        info!(%right, %left, "intraocular pressure");
        ctx.values.set(1, right);
        ctx.values.set(2, left);
        Ok(channel.finish())
    }
}

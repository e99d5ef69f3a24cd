//! Tomey CT-70 non-contact tonometer.
//!
//! The print-out lists up to three readings per eye after `R ` and `L `,
//! each in a 4-character column:
//!
//! ```text
//!   @ ... R  15  16  14 ... L  13 (14) 13 ...
//!           ^2  ^6  ^10
//! ```
//!
//! The lowest all-digit reading wins. A first reading that is not all digits
//! (an unstable measurement) counts as 99, and an eye left at 99 is reported
//! blank.

use medlink_core::codec::{char_index, is_all_digits, parse_integer, window_at};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
};
use tracing::debug;

/// Value standing in for an unstable first reading.
const UNSTABLE: &str = "99";

/// Offsets of the three readings after the eye marker.
const READINGS: [usize; 3] = [2, 6, 10];

/// Tomey CT-70. Right eye in slot 1, left eye in slot 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ct70Driver;

impl Ct70Driver {
    /// Lowest reading after `marker`, or blank.
    pub fn eye(text: &str, marker: &str) -> String {
        let Some(index) = char_index(text, marker).filter(|&i| i > 0) else {
            return String::new();
        };
        let reading = |offset: usize| {
            window_at(text, index + offset, 4)
                .map(|w| w.trim().to_string())
                .unwrap_or_default()
        };

        let first = reading(READINGS[0]);
        let mut best = if is_all_digits(&first) {
            first
        } else {
            UNSTABLE.to_string()
        };
        for offset in &READINGS[1..] {
            let next = reading(*offset);
            if !is_all_digits(&next) {
                continue;
            }
            if parse_integer(&best) > parse_integer(&next) {
                best = next;
            }
        }

        if best == UNSTABLE {
            String::new()
        } else {
            best
        }
    }
}

impl Driver for Ct70Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Ct70
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let text = channel.receive("result")?.text();
        if !text.contains('@') {
            return Err(ProtocolError::UnexpectedReply {
                step: "result",
                expected: "@".into(),
                actual: text,
            });
        }

        let right = Self::eye(&text, "R ");
        let left = Self::eye(&text, "L ");
        debug!(%right, %left, "intraocular pressure");
        ctx.values.set(1, right);
        ctx.values.set(2, left);
        Ok(channel.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlink_core::{execute, ValueVector};
    use medlink_mock::{Script, ScriptedTransport};

    fn run(frame: &str) -> (ResultCode, ValueVector) {
        let mut transport = ScriptedTransport::new(Script::new().reply(frame));
        let mut ctx = MeasurementContext::new("addr", ValueVector::new());
        let code = execute(&Ct70Driver, &mut transport, &mut ctx);
        (code, ctx.values)
    }

    #[test]
    fn lowest_reading_per_eye() {
        let (code, values) = run("@CT70 R   15  16  14  L   13 (12)  13  \r\n");
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(1), "14");
        assert_eq!(values.get(2), "13");
    }

    #[test]
    fn unstable_first_reading_is_replaced() {
        assert_eq!(Ct70Driver::eye("@ R (15)  17  16 ", "R "), "16");
    }

    #[test]
    fn unstable_eye_is_blank() {
        assert_eq!(Ct70Driver::eye("@ R (15)(17) --- ", "R "), "");
    }

    #[test]
    fn missing_eye_is_blank() {
        let (code, values) = run("@CT70 R   15  16  14  \r\n");
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(1), "14");
        assert_eq!(values.get(2), "");
    }

    #[test]
    fn frame_without_marker_cancels() {
        let (code, _) = run("CT70 R   15  16  14");
        assert_eq!(code, ResultCode::Cancelled);
    }
}

//! Tanita scales with delimited or tagged result frames.

use medlink_core::codec::{
    edit_leading_zeros, extract_between, is_numeric, parse_decimal, round_one_decimal,
    set_parity, strip_parity, Parity,
};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Strictness,
    Transport,
};
use tracing::{debug, warn};

// =============================================================================
// WB-110
// =============================================================================

/// Tanita WB-110 digital scale.
///
/// The scale is polled with a parity-encoded `DR` request. A stable reading
/// arrives as `S ` followed by the weight in characters 5-10. Until the weight
/// is positive the request is repeated (lenient) or the run ends (strict).
#[derive(Debug, Clone, Copy, Default)]
pub struct Wb110Driver;

impl Wb110Driver {
    fn request() -> Vec<u8> {
        let mut command = b"DR\r\n".to_vec();
        let len = command.len();
        set_parity(&mut command, len, Parity::Even);
        command
    }
}

impl Driver for Wb110Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Wb110
    }

    fn default_strictness(&self) -> Strictness {
        Strictness::Lenient
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        let request = Self::request();

        loop {
            ctx.budget.tick()?;
            channel.send(&request)?;

            let frame = channel.receive("weight")?;
            let len = frame.len();
            strip_parity(frame.bytes_mut(), len);
            let text = frame.text();

            if text.starts_with("S ") {
                let window: String = text.chars().skip(4).take(6).collect();
                if parse_decimal(&window).is_some_and(|w| w > 0.0) {
                    ctx.values.set(2, edit_leading_zeros(&window));
                    return Ok(channel.finish());
                }
            }

            if !ctx.is_lenient() {
                return Err(ProtocolError::UnexpectedReply {
                    step: "weight",
                    expected: "S <weight>".into(),
                    actual: text.trim_end().to_string(),
                });
            }
            debug!(frame = text.trim_end(), "no stable weight yet");
        }
    }
}

// =============================================================================
// WB-150
// =============================================================================

/// Tanita WB-150 digital scale.
///
/// Frames are read until one starts with `{0,16`; the weight between `Wk,`
/// and `,Pt,` is rounded to one decimal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wb150Driver;

/// WB-150 frames can carry the whole measurement history.
const WB150_FRAME_CAPACITY: usize = 2000;

impl Driver for Wb150Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Wb150
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, WB150_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let text = loop {
            ctx.budget.tick()?;
            let frame = channel.receive("result")?;
            if frame.starts_with(b"{0,16") {
                break frame.text();
            }
        };

        let weight = if text.contains("Wk,") {
            let raw = extract_between(&text, "Wk,", ",Pt,").unwrap_or_default();
            let value = parse_decimal(&raw).ok_or_else(|| ProtocolError::rejected("weight", raw))?;
            round_one_decimal(value)
        } else {
            "0".to_string()
        };
        ctx.values.set(2, weight);
        Ok(channel.finish())
    }
}

// =============================================================================
// TBF-310
// =============================================================================

/// Tanita TBF-310 body composition analyser.
///
/// One parity-encoded, comma-separated record: field 7 is the weight and
/// field 9 the body fat. A field that is present but not numeric cancels a
/// strict run; a lenient run skips the record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tbf310Driver;

impl Driver for Tbf310Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Tbf310
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let frame = channel.receive("result")?;
        let len = frame.len();
        strip_parity(frame.bytes_mut(), len);
        let text = frame.text();
        let fields: Vec<&str> = text.split(',').collect();

        let (Some(weight), Some(fat)) = (fields.get(6), fields.get(8)) else {
            warn!(fields = fields.len(), "record too short");
            return Err(ProtocolError::FrameTooShort {
                field: "fat",
                needed: 9,
                available: fields.len(),
            });
        };
        if weight.is_empty() && fat.is_empty() {
            return Err(ProtocolError::not_numeric("weight", ""));
        }
        let malformed = [("weight", *weight), ("fat", *fat)]
            .into_iter()
            .find(|(_, value)| !value.is_empty() && !is_numeric(value));
        if let Some((name, bad)) = malformed {
            if ctx.is_lenient() {
                warn!(field = name, raw = bad, "skipping malformed record");
                return Ok(channel.finish());
            }
            return Err(ProtocolError::not_numeric(name, bad));
        }

        ctx.values.set(2, *weight);
        ctx.values.set(3, *fat);
        Ok(channel.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlink_core::{execute, ValueVector};
    use medlink_mock::{Script, ScriptedTransport};

    fn run(driver: &dyn Driver, script: Script) -> (ResultCode, ValueVector, Vec<Vec<u8>>) {
        let mut transport = ScriptedTransport::new(script);
        let probe = transport.probe();
        let mut ctx = MeasurementContext::new("addr", ValueVector::new());
        let code = execute(driver, &mut transport, &mut ctx);
        (code, ctx.values, probe.sent())
    }

    fn with_parity(text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        let len = bytes.len();
        set_parity(&mut bytes, len, Parity::Even);
        bytes
    }

    #[test]
    fn wb110_request_carries_parity() {
        assert_eq!(Wb110Driver::request(), vec![0x44, 0xD2, 0x8D, 0x0A]);
    }

    #[test]
    fn wb110_repeats_until_stable() {
        let script = Script::new()
            .reply(with_parity("U   0061.8kg\r\n"))
            .reply(with_parity("S   0062.5kg\r\n"));
        let (code, values, sent) = run(&Wb110Driver, script);
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(2), "62.5");
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn wb110_strict_cancels_on_unstable() {
        let mut transport =
            ScriptedTransport::new(Script::new().reply(with_parity("U   0061.8kg\r\n")));
        let mut ctx = MeasurementContext::new("addr", ValueVector::new())
            .strictness(Some(Strictness::Strict));
        assert_eq!(execute(&Wb110Driver, &mut transport, &mut ctx), ResultCode::Cancelled);
    }

    #[test]
    fn wb110_empty_read_cancels() {
        let (code, values, _) = run(&Wb110Driver, Script::new());
        assert_eq!(code, ResultCode::Cancelled);
        assert!(values.is_blank(2));
    }

    #[test]
    fn wb150_rounds_weight() {
        let script = Script::new()
            .reply("{1,xx")
            .reply("{0,16,~0,1,Wk,62.46,Pt,1.0,");
        let (code, values, _) = run(&Wb150Driver, script);
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(2), "62.5");
    }

    #[test]
    fn wb150_missing_weight_is_zero() {
        let (code, values, _) = run(&Wb150Driver, Script::new().reply("{0,16,~0,1,Pt,1.0,"));
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(2), "0");
    }

    #[test]
    fn tbf310_splits_fields() {
        let record = with_parity("0,1,2,3,4,5,62.5,7,21.4,9\r\n");
        let (code, values, _) = run(&Tbf310Driver, Script::new().reply(record));
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(2), "62.5");
        assert_eq!(values.get(3), "21.4");
    }

    #[test]
    fn tbf310_short_record_cancels() {
        let (code, _, _) = run(&Tbf310Driver, Script::new().reply("0,1,2"));
        assert_eq!(code, ResultCode::Cancelled);
    }

    #[test]
    fn tbf310_empty_values_cancel() {
        let (code, _, _) = run(&Tbf310Driver, Script::new().reply("0,1,2,3,4,5,,7,,9"));
        assert_eq!(code, ResultCode::Cancelled);
    }

    #[test]
    fn tbf310_malformed_field_strict_and_lenient() {
        let record = || with_parity("0,1,2,3,4,5,62.5,7,2l.4,9\r\n");

        let mut transport = ScriptedTransport::new(Script::new().reply(record()));
        let mut ctx = MeasurementContext::new("addr", ValueVector::new())
            .strictness(Some(Strictness::Strict));
        assert_eq!(execute(&Tbf310Driver, &mut transport, &mut ctx), ResultCode::Cancelled);
        assert!(ctx.values.is_blank(2));

        let mut transport = ScriptedTransport::new(Script::new().reply(record()));
        let mut ctx = MeasurementContext::new("addr", ValueVector::new())
            .strictness(Some(Strictness::Lenient));
        assert_eq!(execute(&Tbf310Driver, &mut transport, &mut ctx), ResultCode::Success);
        assert!(ctx.values.is_blank(2));
        assert!(ctx.values.is_blank(3));
    }
}

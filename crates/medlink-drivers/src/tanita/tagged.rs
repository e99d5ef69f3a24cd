//! DC-217 / DC-430 tagged result record.
//!
//! The record layout depends on what the instrument measured:
//!
//! | Tags present      | Slots filled            |
//! |-------------------|-------------------------|
//! | `Bt`              | Hm -> 1, Wk -> 2, FW -> 3 |
//! | `Hm` without `Bt` | Hm -> 1, Wk -> 2        |
//! | neither           | Wk -> 2                 |
//!
//! The DC-430 never reports height, so slot 1 stays empty for it. A tagged
//! value that is present but not numeric cancels a strict run; a lenient run
//! skips the record.

use medlink_core::codec::{extract_tagged, is_numeric, TagWidth};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
};
use tracing::{debug, warn};

const HEIGHT: (&str, TagWidth) = ("Hm,", TagWidth::Fixed(5));
const WEIGHT: (&str, TagWidth) = ("Wk,", TagWidth::Fixed(5));
const FAT: (&str, TagWidth) = ("FW,", TagWidth::Fixed(4));

/// Tanita DC-217 and DC-430 body composition analysers.
#[derive(Debug, Clone, Copy)]
pub struct Dc217Driver {
    model: DeviceModel,
    fill_height: bool,
}

impl Dc217Driver {
    /// DC-217.
    pub fn dc217() -> Self {
        Self {
            model: DeviceModel::Dc217,
            fill_height: true,
        }
    }

    /// DC-430, same record format. Height is dropped.
    pub fn dc430() -> Self {
        Self {
            model: DeviceModel::Dc430,
            fill_height: false,
        }
    }
}

fn tag(text: &str, (tag, width): (&str, TagWidth)) -> String {
    extract_tagged(text, tag, width).unwrap_or_default()
}

impl Driver for Dc217Driver {
    fn model(&self) -> DeviceModel {
        self.model
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        let text = channel.receive("result")?.text();

        let mut slots: Vec<(usize, &'static str, String)> = if text.contains("Bt") {
            vec![
                (1, "height", tag(&text, HEIGHT)),
                (2, "weight", tag(&text, WEIGHT)),
                (3, "fat", tag(&text, FAT)),
            ]
        } else if text.contains("Hm") {
            vec![(1, "height", tag(&text, HEIGHT)), (2, "weight", tag(&text, WEIGHT))]
        } else {
            vec![(2, "weight", tag(&text, WEIGHT))]
        };

        if slots.iter().all(|(_, _, value)| value.is_empty()) {
            return Err(ProtocolError::not_numeric("weight", ""));
        }
        if let Some((_, name, bad)) = slots
            .iter()
            .find(|(_, _, value)| !value.is_empty() && !is_numeric(value))
        {
            if ctx.is_lenient() {
                warn!(field = *name, raw = %bad, "skipping malformed tagged record");
                return Ok(channel.finish());
            }
            return Err(ProtocolError::not_numeric(*name, bad.clone()));
        }
        if !self.fill_height {
            slots.retain(|(slot, _, _)| *slot != 1);
        }
        debug!(slots = slots.len(), "tagged record parsed");
        for (slot, _, value) in slots {
            ctx.values.set(slot, value);
        }
        Ok(channel.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlink_core::{execute, Strictness, ValueVector};
    use medlink_mock::{Script, ScriptedTransport};

    fn run_with(
        driver: Dc217Driver,
        record: &str,
        strictness: Option<Strictness>,
    ) -> (ResultCode, ValueVector) {
        let mut transport = ScriptedTransport::new(Script::new().reply(record));
        let mut ctx = MeasurementContext::new("addr", ValueVector::new()).strictness(strictness);
        let code = execute(&driver, &mut transport, &mut ctx);
        (code, ctx.values)
    }

    fn run(record: &str) -> (ResultCode, ValueVector) {
        run_with(Dc217Driver::dc217(), record, None)
    }

    #[test]
    fn body_composition_record() {
        let (code, values) = run("{0,16,~0,1,Bt,0,GE,1,Hm,162.5,Pt,1.0,Wk,58.40,FW,21.4,MW,43.2");
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(1), "162.5");
        assert_eq!(values.get(2), "58.40");
        assert_eq!(values.get(3), "21.4");
    }

    #[test]
    fn height_weight_record() {
        let (code, values) = run("{0,16,Hm,162.5,Pt,1.0,Wk,58.4,");
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(1), "162.5");
        assert_eq!(values.get(2), "58.4");
        assert_eq!(values.get(3), "");
    }

    #[test]
    fn weight_only_record() {
        let (code, values) = run("{0,16,Pt,1.0,Wk,58.4,");
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(1), "");
        assert_eq!(values.get(2), "58.4");
    }

    #[test]
    fn empty_record_cancels() {
        let (code, _) = run("{0,16,Pt,1.0");
        assert_eq!(code, ResultCode::Cancelled);
    }

    #[test]
    fn dc430_leaves_height_empty() {
        let record = "{0,16,~0,1,Bt,0,GE,1,Hm,162.5,Pt,1.0,Wk,58.40,FW,21.4,MW,43.2";
        let (code, values) = run_with(Dc217Driver::dc430(), record, None);
        assert_eq!(code, ResultCode::Success);
        assert!(values.is_blank(1));
        assert_eq!(values.get(2), "58.40");
        assert_eq!(values.get(3), "21.4");

        let (code, values) = run_with(Dc217Driver::dc430(), "{0,16,Hm,162.5,Pt,1.0,Wk,58.4,", None);
        assert_eq!(code, ResultCode::Success);
        assert!(values.is_blank(1));
        assert_eq!(values.get(2), "58.4");
    }

    #[test]
    fn malformed_value_cancels_when_strict() {
        let (code, values) = run_with(
            Dc217Driver::dc217(),
            "{0,16,Hm,162.5,Pt,1.0,Wk,5x.4,",
            Some(Strictness::Strict),
        );
        assert_eq!(code, ResultCode::Cancelled);
        assert!(values.is_blank(1));
        assert!(values.is_blank(2));
    }

    #[test]
    fn malformed_value_skipped_when_lenient() {
        let (code, values) = run_with(
            Dc217Driver::dc217(),
            "{0,16,Hm,162.5,Pt,1.0,Wk,5x.4,",
            Some(Strictness::Lenient),
        );
        assert_eq!(code, ResultCode::Success);
        assert!(values.is_blank(1));
        assert!(values.is_blank(2));
    }
}

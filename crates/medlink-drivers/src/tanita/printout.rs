//! Single-shot fixed-offset Tanita instruments.
//!
//! TBF-210 and DC-250 (print-out mode) push one result frame after the
//! measurement; the BH-100 stadiometer does the same with a single height.
//!
//! | Field  | Offset | Width | Slot |
//! |--------|--------|-------|------|
//! | height | 34     | 7     | 1    |
//! | weight | 42     | 7     | 2    |
//! | fat    | 55     | 4     | 3    |

use medlink_core::codec::{is_numeric, parse_decimal, FieldSpec};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Strictness,
    Transport,
};
use tracing::{debug, warn};

/// Print-out frame fields, literal decimals.
const HEIGHT: FieldSpec = FieldSpec::decimal("height", 34, 7, 1, None);
const WEIGHT: FieldSpec = FieldSpec::decimal("weight", 42, 7, 1, None);
const FAT: FieldSpec = FieldSpec::decimal("fat", 55, 4, 1, None);

/// Body composition analyser in print-out mode (TBF-210, DC-250).
#[derive(Debug, Clone)]
pub struct PrintoutDriver {
    model: DeviceModel,
    fields: [FieldSpec; 3],
    strictness: Strictness,
}

impl PrintoutDriver {
    /// TBF-210: values rendered in shortest form, lenient by default.
    pub fn tbf210() -> Self {
        Self {
            model: DeviceModel::Tbf210,
            fields: [HEIGHT, WEIGHT, FAT],
            strictness: Strictness::Lenient,
        }
    }

    /// DC-250 print-out: values rendered with one decimal, strict.
    pub fn dc250t() -> Self {
        let one_place =
            |spec: FieldSpec| FieldSpec::decimal(spec.name, spec.start, spec.width, 1, Some(1));
        Self {
            model: DeviceModel::Dc250T,
            fields: [one_place(HEIGHT), one_place(WEIGHT), one_place(FAT)],
            strictness: Strictness::Strict,
        }
    }
}

impl Driver for PrintoutDriver {
    fn model(&self) -> DeviceModel {
        self.model
    }

    fn default_strictness(&self) -> Strictness {
        self.strictness
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let frame = channel.receive("result")?;
        let parsed = self
            .fields
            .iter()
            .map(|spec| spec.read(frame.bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some((spec, bad)) = self.fields.iter().zip(&parsed).find(|(_, f)| !f.numeric) {
            if ctx.is_lenient() {
                warn!(field = spec.name, raw = %bad.raw, "skipping malformed print-out");
                return Ok(channel.finish());
            }
            return Err(ProtocolError::not_numeric(spec.name, bad.raw.clone()));
        }

        for (slot, field) in (1..).zip(&parsed) {
            ctx.values.set(slot, field.value.as_str());
        }
        // a fat reading of zero means the analysis was skipped
        if parse_decimal(ctx.values.get(3)) == Some(0.0) {
            ctx.values.set(3, "");
        }
        debug!(height = ctx.values.get(1), weight = ctx.values.get(2), "print-out parsed");
        Ok(channel.finish())
    }
}

/// Tanita BH-100 stadiometer.
///
/// Height starts at offset 54; it is four characters wide when offset 58 is a
/// comma and five otherwise. A non-numeric height leaves the slot blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bh100Driver;

impl Driver for Bh100Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Bh100
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let frame = channel.receive("result")?;
        let width = if frame.byte_at(58) == Some(b',') { 4 } else { 5 };
        let height = FieldSpec::text("height", 54, width).raw(frame.bytes())?;
        if is_numeric(&height) {
            ctx.values.set(1, height);
        } else {
            debug!(%height, "height not measured");
        }
        Ok(channel.finish())
    }
}

//! Fukuda Colin VaSera VS-3000 arterial stiffness analyser.
//!
//! The VS-3000 is driven in two halves: the patient record is pushed before
//! the examination ([`Vs3000SendDriver`]) and the result frame is read after
//! it ([`Vs3000RecvDriver`]).

use medlink_core::codec::{digits_only, encode, pad_left_zero, pad_right_space, FieldSpec};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, SendDriver,
    Transport, ValueVector,
};
use tracing::debug;

use crate::patient::{sex_letter, BirthDate};

/// CAVI and ABI per side, in slot order.
const RESULT_FIELDS: [FieldSpec; 4] = [
    FieldSpec::text("r_cavi", 81, 4),
    FieldSpec::text("l_cavi", 86, 4),
    FieldSpec::text("r_abi", 101, 4),
    FieldSpec::text("l_abi", 105, 4),
];

/// VS-3000 result reader: R-CAVI, L-CAVI, R-ABI, L-ABI in slots 1-4.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vs3000RecvDriver;

impl Driver for Vs3000RecvDriver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Vs3000Recv
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let frame = channel.receive("result")?;
        let mut readings = Vec::with_capacity(RESULT_FIELDS.len());
        for spec in &RESULT_FIELDS {
            let field = spec.read(frame.bytes())?;
            if !field.numeric {
                return Err(ProtocolError::rejected(spec.name, field.raw));
            }
            readings.push(field.value);
        }

        debug!(?readings, "CAVI/ABI");
        for (slot, value) in (1..).zip(readings) {
            ctx.values.set(slot, value);
        }
        Ok(channel.finish())
    }
}

/// VS-3000 patient sender.
///
/// Parameters: 1 exam number, 2 name, 3 sex, 4 birth date, 5 age,
/// 6 height, 7 weight, 8 examinee code.
///
/// | Field         | Width | Padding     |
/// |---------------|-------|-------------|
/// | exam number   | 6     | zero, left  |
/// | examinee code | 10    | zero, left  |
/// | name          | 24    | space, right |
/// | birth date    | 8     |             |
/// | sex           | 1     | `M` / `F`   |
/// | age           | 3     | space, right |
/// | weight        | 5     | space, right |
/// | height        | 5     | space, right |
#[derive(Debug, Clone, Copy, Default)]
pub struct Vs3000SendDriver;

impl SendDriver for Vs3000SendDriver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Vs3000Send
    }

    fn compose(&self, params: &ValueVector) -> Result<Vec<u8>, ProtocolError> {
        let birth = BirthDate::from_param(params, 4)?;
        let record = [
            pad_left_zero(&digits_only(params.get(1)), 6),
            pad_left_zero(&digits_only(params.get(8)), 10),
            pad_right_space(params.get(2), 24),
            birth.compact(),
            sex_letter(params.get(3)).to_string(),
            pad_right_space(&digits_only(params.get(5)), 3),
            pad_right_space(params.get(7).trim(), 5),
            pad_right_space(params.get(6).trim(), 5),
        ]
        .concat();
        Ok(encode(&record))
    }
}

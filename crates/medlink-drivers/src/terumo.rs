//! Blood pressure monitors (Terumo TM-2580, A&D TM-2655).
//!
//! Both fill slot 1 with the systolic pressure, slot 2 with the diastolic
//! pressure and slot 3 with the pulse rate, as whole numbers.

use medlink_core::codec::{append_bcc, control, BccMode, FieldSpec};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
};
use tracing::{debug, warn};

/// Read the three pressure fields, failing on the first non-numeric one.
fn read_pressures(frame: &[u8], fields: &[FieldSpec; 3]) -> Result<[String; 3], ProtocolError> {
    let mut values: [String; 3] = Default::default();
    for (value, spec) in values.iter_mut().zip(fields) {
        let parsed = spec.read(frame)?;
        if !parsed.numeric {
            return Err(ProtocolError::rejected(spec.name, parsed.raw));
        }
        *value = parsed.value;
    }
    Ok(values)
}

// =============================================================================
// TM-2580
// =============================================================================

const TM2580_FIELDS: [FieldSpec; 3] = [
    FieldSpec::integer("systolic", 17, 3),
    FieldSpec::integer("diastolic", 26, 3),
    FieldSpec::integer("pulse", 30, 3),
];

/// Terumo TM-2580.
///
/// A single `ENQ 'S' ETX` starts the measurement; the result frame follows
/// once the cuff has deflated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tm2580Driver;

impl Tm2580Driver {
    /// Measurement start command.
    pub const START: [u8; 3] = [control::ENQ, b'S', control::ETX];
}

impl Driver for Tm2580Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Tm2580
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        channel.send(&Self::START)?;

        let frame = channel.receive("result")?;
        let [systolic, diastolic, pulse] = read_pressures(frame.bytes(), &TM2580_FIELDS)?;
        debug!(%systolic, %diastolic, %pulse, "TM-2580 result");

        ctx.values.set(1, systolic);
        ctx.values.set(2, diastolic);
        ctx.values.set(3, pulse);
        Ok(channel.finish())
    }
}

// =============================================================================
// TM-2655
// =============================================================================

const TM2655_STATUS: FieldSpec = FieldSpec::text("status", 30, 3);
const TM2655_FIELDS: [FieldSpec; 3] = [
    FieldSpec::integer("systolic", 35, 3),
    FieldSpec::integer("diastolic", 45, 3),
    FieldSpec::integer("pulse", 50, 3),
];

/// Completion status of a good TM-2655 measurement.
const TM2655_OK: &str = "E00";

/// A&D TM-2655.
///
/// ```text
///   host                          monitor
///   SYN SYN SOH "00" STX "ST" ETX BCC  ->
///                                 <-  acknowledge (byte 6 NAK = refused)
///                                 <-  result, status "E00" at 30
///   SYN SYN SOH "00" STX "SP" ETX BCC  ->  (only when aborting)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Tm2655Driver;

impl Tm2655Driver {
    fn command(code: &[u8; 2]) -> Vec<u8> {
        let body = [control::SOH, b'0', b'0', control::STX, code[0], code[1], control::ETX];
        let mut command = vec![control::SYN, control::SYN];
        command.extend(append_bcc(&body, BccMode::Xor));
        command
    }

    /// Measurement start command.
    pub fn start() -> Vec<u8> {
        Self::command(b"ST")
    }

    /// Measurement stop command.
    pub fn stop() -> Vec<u8> {
        Self::command(b"SP")
    }

    fn abort(channel: &mut Channel<'_>, err: ProtocolError) -> Result<ResultCode, ProtocolError> {
        warn!(error = %err, "stopping measurement");
        channel.send(&Self::stop())?;
        Err(err)
    }
}

impl Driver for Tm2655Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Tm2655
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        channel.send(&Self::start())?;

        let (silent, refused) = {
            let acknowledge = channel.receive_any();
            (acknowledge.is_empty(), acknowledge.byte_at(6) == Some(control::NAK))
        };
        if silent {
            return Self::abort(&mut channel, ProtocolError::EmptyRead { step: "start" });
        }
        if refused {
            return Self::abort(&mut channel, ProtocolError::Nak { step: "start" });
        }

        if channel.receive_any().is_empty() {
            return Self::abort(&mut channel, ProtocolError::EmptyRead { step: "result" });
        }

        let frame = channel.frame().bytes();
        let status = TM2655_STATUS.raw(frame)?;
        if status != TM2655_OK {
            return Err(ProtocolError::UnexpectedReply {
                step: "result",
                expected: TM2655_OK.into(),
                actual: status,
            });
        }
        let [systolic, diastolic, pulse] = read_pressures(frame, &TM2655_FIELDS)?;
        debug!(%systolic, %diastolic, %pulse, "TM-2655 result");

        ctx.values.set(1, systolic);
        ctx.values.set(2, diastolic);
        ctx.values.set(3, pulse);
        Ok(channel.finish())
    }
}

//! Aloka AOS-100NW ultrasound bone densitometer.
//!
//! The host opens the exchange by sending the patient record, then reads the
//! result back one CRLF line at a time:
//!
//! ```text
//!   host -> STX number CRLF name(18) CRLF sex CRLF YYYY/MM/DD CRLF site CRLF ETX
//!   line  1       STX + patient number echo      mismatch -> Cancelled
//!   lines 2-15    skipped
//!   line 16       bone density                   -> slot 1
//!   line 17       skipped
//!   line 18       age comparison                 -> slot 2
//!   line 19       skipped
//!   line 20       maximum bone mass              -> slot 3
//!   line 21       ETX                            anything else -> Cancelled
//! ```
//!
//! Any empty read cancels the run. All three values must be numeric.

use medlink_core::codec::{control, digits_only, encode, is_numeric, pad_right_space};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
    ValueVector,
};
use tracing::debug;

use crate::handshake::skip_lines;
use crate::patient::BirthDate;

/// Width of the name line.
const NAME_WIDTH: usize = 18;

/// Header lines between the patient echo and the bone density.
const HEADER_LINES: usize = 14;

/// Sex labels in the instrument's double-byte character set.
const MALE: &[u8] = &[0x92, 0x6A, 0x90, 0xAB];
const FEMALE: &[u8] = &[0x8F, 0x97, 0x90, 0xAB];

/// Measurement site, the right calcaneus.
const SITE: &[u8] = &[0x89, 0x45, 0xE6, 0xF9, 0x8D, 0x9C];

/// Aloka AOS-100NW.
///
/// Reads patient number, name, sex and birth date from parameter slots 1-4.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aos100NwDriver;

impl Aos100NwDriver {
    /// The patient record opening the exchange.
    pub fn compose(params: &ValueVector) -> Result<Vec<u8>, ProtocolError> {
        let birth = BirthDate::from_param(params, 4)?;
        let sex = if params.get(3).trim() == "1" { MALE } else { FEMALE };

        let mut record = vec![control::STX];
        let mut line = |bytes: &[u8]| {
            record.extend_from_slice(bytes);
            record.extend_from_slice(control::CRLF);
        };
        line(&encode(params.get(1).trim()));
        line(&encode(&pad_right_space(params.get(2), NAME_WIDTH)));
        line(sex);
        line(&encode(&birth.slashed()));
        line(SITE);
        record.push(control::ETX);
        Ok(record)
    }

    fn value(channel: &mut Channel<'_>, name: &'static str) -> Result<String, ProtocolError> {
        let value = channel.receive_line(name)?.text().trim().to_string();
        if !is_numeric(&value) {
            return Err(ProtocolError::not_numeric(name, value));
        }
        Ok(value)
    }
}

impl Driver for Aos100NwDriver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Aos100Nw
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let record = Self::compose(&ctx.params)?;
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        channel.send(&record)?;

        let echo = channel.receive_line("patient")?.text();
        let number = digits_only(ctx.params.get(1));
        let echoed = echo.strip_prefix(char::from(control::STX)).map(digits_only);
        if echoed.as_deref() != Some(number.as_str()) {
            return Err(ProtocolError::UnexpectedReply {
                step: "patient",
                expected: format!("STX {number}"),
                actual: echo.trim_end().to_string(),
            });
        }

        skip_lines(&mut channel, "header", HEADER_LINES)?;
        let density = Self::value(&mut channel, "bone density")?;
        skip_lines(&mut channel, "header", 1)?;
        let age_ratio = Self::value(&mut channel, "age comparison")?;
        skip_lines(&mut channel, "header", 1)?;
        let peak_mass = Self::value(&mut channel, "maximum bone mass")?;

        let trailer = channel.receive_line("trailer")?;
        if trailer.first() != Some(control::ETX) {
            return Err(ProtocolError::UnexpectedReply {
                step: "trailer",
                expected: "ETX".into(),
                actual: trailer.text().trim_end().to_string(),
            });
        }

        debug!(%density, %age_ratio, %peak_mass, "bone density parsed");
        ctx.values.set(1, density);
        ctx.values.set(2, age_ratio);
        ctx.values.set(3, peak_mass);
        Ok(channel.finish())
    }
}

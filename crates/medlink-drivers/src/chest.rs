//! Chest SP-350COPD spirometer.
//!
//! The spirometer asks for the patient record, then streams its results as a
//! sequence of control-byte framed records:
//!
//! ```text
//!   spirometer                        host
//!   ENQ                          ->
//!                                <-   ACK
//!   STX <13-byte patient id> ... ->
//!                                <-   STX "0" <patient record> ETX
//!   ACK                          ->
//!   ENQ                          ->
//!                                <-   ACK
//!   loop:
//!     SOH <header>               ->   ACK
//!     STX <TAB-separated data>   ->   parse, ACK
//!     CAN                        ->   ACK, run cancelled by the instrument
//!     EOT                        ->   ACK, validate, done
//!     nothing / run cancelled    ->   CAN, run cancelled by the host
//! ```
//!
//! # Result slots
//!
//! | Slot | Value                      | Record | Tag      | Field |
//! |------|----------------------------|--------|----------|-------|
//! | 1    | vital capacity             | 0201   | `VC`     | 3     |
//! | 2    | % vital capacity           | 0201   | `VC`     | 4     |
//! | 3    | FEV1                       | 0202   | `FEV1`   | 3     |
//! | 4    | FEV1 % (Gaensler)          | 0202   | `FEV1%G` | 3     |
//! | 5    | predicted vital capacity   | 0201   | `VC`     | 2     |
//! | 6    | forced vital capacity      | 0202   | `FVC`    | 3     |
//! | 7    | predicted FEV1             | 0202   | `FEV1`   | 2     |
//! | 8    | % FEV1                     | 0202   | `FEV1`   | 4     |

use medlink_core::codec::{
    control, decode, digits_only, encode, is_numeric, nth_field_after, pad_left_space, pad_left_zero,
    pad_right_space,
};
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
    ValueVector,
};
use tracing::{debug, info, warn};

/// Results can span several kilobytes.
const FRAME_CAPACITY: usize = 3000;

/// Patient id echoed back from the request frame (1-based offset, width).
const PATIENT_ID: (usize, usize) = (8, 13);

/// Record type position in an STX data record (1-based offset, width).
const RECORD_TYPE: (usize, usize) = (7, 4);

/// Shortest STX record that carries a record type.
const MIN_RECORD_LEN: usize = 10;

/// Tag lookups per record type: (tag, field after tag, slot).
const VITAL_CAPACITY: &[(&str, usize, usize)] = &[("VC", 2, 5), ("VC", 3, 1), ("VC", 4, 2)];
const FORCED_EXPIRATION: &[(&str, usize, usize)] = &[
    ("FVC", 3, 6),
    ("FEV1", 3, 3),
    ("FEV1%G", 3, 4),
    ("FEV1", 2, 7),
    ("FEV1", 4, 8),
];

/// Chest SP-350COPD.
///
/// Parameters: 1 exam number, 2 name, 4 sex (`1` male, `2` female),
/// 5 birth date, 6 age, 7 height, 8 weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sp350CopdDriver;

impl Sp350CopdDriver {
    /// Patient record sent in reply to the spirometer's request.
    ///
    /// `patient_id` is echoed verbatim from the request frame.
    pub fn patient_record(patient_id: &[u8], params: &ValueVector) -> Vec<u8> {
        let param = |i: usize| params.get(i).trim();
        let sex = match param(4) {
            "1" => "M",
            "2" => "F",
            _ => "N",
        };
        let body_size = |value: &str| {
            if value.is_empty() {
                "000.0".to_string()
            } else {
                pad_left_zero(value, 5)
            }
        };

        let mut text = String::new();
        text.push_str(&pad_left_space(&digits_only(param(1)), 9));
        text.push_str(&pad_right_space(params.get(2), 30));
        text.push_str(param(5));
        text.push_str(&pad_left_space(&digits_only(param(6)), 3));
        text.push_str(sex);
        text.push_str(&body_size(param(7)));
        text.push_str(&body_size(param(8)));
        // department and physician, both blank
        text.push_str(&" ".repeat(60));

        let mut record = vec![control::STX, b'0'];
        record.extend_from_slice(patient_id);
        record.extend(encode(&text));
        record.push(control::ETX);
        record
    }

    /// Fill result slots from one STX data record.
    fn parse_record(frame: &[u8], values: &mut ValueVector) {
        if frame.len() < MIN_RECORD_LEN {
            return;
        }
        let (start, width) = RECORD_TYPE;
        let lookups = match &frame[start - 1..start - 1 + width] {
            b"0201" => VITAL_CAPACITY,
            b"0202" => FORCED_EXPIRATION,
            _ => return,
        };
        let text = decode(frame);
        for &(tag, field, slot) in lookups {
            let value = nth_field_after(&text, tag, '\t', field).unwrap_or_default();
            values.set(slot, value);
        }
    }

    /// Final check once the spirometer signals the end of transmission.
    fn validate(values: &mut ValueVector) -> Result<(), ProtocolError> {
        values.trim_all();
        for slot in 1..=7 {
            let value = values.get(slot);
            if !value.is_empty() && !is_numeric(value) {
                return Err(ProtocolError::not_numeric("spirometry", value));
            }
        }
        for slot in [4, 8] {
            if values.is_blank(slot) {
                values.set(slot, "0");
            }
        }
        Ok(())
    }

    fn expect_byte(
        channel: &mut Channel<'_>,
        step: &'static str,
        byte: u8,
    ) -> Result<(), ProtocolError> {
        let frame = channel.receive(step)?;
        if !frame.contains(byte) {
            return Err(ProtocolError::UnexpectedReply {
                step,
                expected: format!("{byte:#04x}"),
                actual: frame.text(),
            });
        }
        Ok(())
    }
}

impl Driver for Sp350CopdDriver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Sp350Copd
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        Self::expect_byte(&mut channel, "enquiry", control::ENQ)?;
        channel.send(&[control::ACK])?;

        Self::expect_byte(&mut channel, "patient_request", control::STX)?;
        let (start, width) = PATIENT_ID;
        let patient_id = channel.frame().physical()[start - 1..start - 1 + width].to_vec();
        let record = Self::patient_record(&patient_id, &ctx.params);
        debug!(len = record.len(), "sending patient record");
        channel.send(&record)?;

        Self::expect_byte(&mut channel, "record_ack", control::ACK)?;
        Self::expect_byte(&mut channel, "result_enquiry", control::ENQ)?;
        channel.send(&[control::ACK])?;

        loop {
            ctx.budget.tick()?;
            let silent = channel.receive_any().is_empty();
            if silent || channel.is_cancelled() {
                channel.send(&[control::CAN])?;
                warn!(silent, "abandoning result transfer");
                return Err(ProtocolError::EmptyRead { step: "results" });
            }

            match channel.frame().first() {
                Some(control::SOH) => channel.send(&[control::ACK])?,
                Some(control::STX) => {
                    Self::parse_record(channel.frame().bytes(), &mut ctx.values);
                    channel.send(&[control::ACK])?;
                }
                Some(control::CAN) => {
                    channel.send(&[control::ACK])?;
                    warn!("spirometer cancelled the transfer");
                    return Err(ProtocolError::InstrumentCancel);
                }
                Some(control::EOT) => {
                    channel.send(&[control::ACK])?;
                    break;
                }
                _ => {}
            }
        }

        Self::validate(&mut ctx.values)?;
        info!(vc = ctx.values.get(1), fev1 = ctx.values.get(3), "spirometry received");
        Ok(channel.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlink_core::{execute, RunLimits};
    use medlink_mock::{Script, ScriptedTransport};

    const ENQ: [u8; 1] = [control::ENQ];
    const ACK: [u8; 1] = [control::ACK];

    fn request() -> Vec<u8> {
        let mut frame = vec![control::STX];
        frame.extend_from_slice(b"000000ID-0000012345");
        frame.push(control::ETX);
        frame
    }

    fn data_record(kind: &str, body: &str) -> Vec<u8> {
        let mut frame = vec![control::STX];
        frame.extend_from_slice(format!("00000{kind}\t{body}").as_bytes());
        frame.push(control::ETX);
        frame
    }

    fn handshake() -> Script {
        Script::new().reply(ENQ).reply(request()).reply(ACK).reply(ENQ)
    }

    fn params() -> ValueVector {
        ValueVector::from_slice(&[
            "", "A-123", "YAMADA TARO", "", "1", "19800101", "45", "170.5", "65.0",
        ])
    }

    fn run(script: Script) -> (ResultCode, ValueVector, Vec<Vec<u8>>) {
        let mut transport = ScriptedTransport::new(script);
        let probe = transport.probe();
        let mut ctx = MeasurementContext::new("addr", params());
        let code = execute(&Sp350CopdDriver, &mut transport, &mut ctx);
        (code, ctx.values, probe.sent())
    }

    #[test]
    fn patient_record_layout() {
        let record = Sp350CopdDriver::patient_record(b"0000012345678", &params());
        assert_eq!(record.first(), Some(&control::STX));
        assert_eq!(record.last(), Some(&control::ETX));
        let text = String::from_utf8_lossy(&record[1..record.len() - 1]).to_string();
        assert!(text.starts_with("00000012345678      123YAMADA TARO"));
        assert!(text.contains("19800101 45M170.5065.0"));
        assert_eq!(record.len(), 1 + 1 + 13 + 9 + 30 + 8 + 3 + 1 + 5 + 5 + 60 + 1);
    }

    #[test]
    fn blank_body_size_is_zeroed() {
        let params = ValueVector::from_slice(&["", "1", "N", "", "3", "20000101", "", "", ""]);
        let record = Sp350CopdDriver::patient_record(b"0000000000001", &params);
        let text = String::from_utf8_lossy(&record).to_string();
        assert!(text.contains("20000101   N000.0000.0"));
    }

    #[test]
    fn soh_stx_eot_succeeds() {
        let script = handshake()
            .reply([control::SOH, b'H'])
            .reply(data_record("0201", "VC\tL\t3.42\t3.10\t91\t"))
            .reply([control::EOT]);
        let (code, values, sent) = run(script);
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(5), "3.42");
        assert_eq!(values.get(1), "3.10");
        assert_eq!(values.get(2), "91");
        assert_eq!(values.get(4), "0");
        assert_eq!(values.get(8), "0");
        // ACK, record, ACK, then one ACK per loop iteration
        assert_eq!(sent.len(), 6);
        assert_eq!(&sent[3..], &[ACK.to_vec(), ACK.to_vec(), ACK.to_vec()]);
    }

    #[test]
    fn forced_expiration_record() {
        let body = "FVC\t4.0\t4.1\t4.25\t\tFEV1\t3.1\t3.05\t3.52\t115\t\tFEV1%G\t80\t81\t82.8\t";
        let script = handshake()
            .reply(data_record("0202", body))
            .reply([control::EOT]);
        let (code, values, _) = run(script);
        assert_eq!(code, ResultCode::Success);
        assert_eq!(values.get(6), "4.25");
        assert_eq!(values.get(3), "3.52");
        assert_eq!(values.get(7), "3.05");
        assert_eq!(values.get(8), "115");
        assert_eq!(values.get(4), "82.8");
    }

    #[test]
    fn instrument_cancel_stops_sending() {
        let script = handshake()
            .reply([control::SOH, b'H'])
            .reply([control::CAN])
            .reply([control::EOT]);
        let (code, _, sent) = run(script);
        assert_eq!(code, ResultCode::Cancelled);
        assert_eq!(sent.last(), Some(&ACK.to_vec()));
        assert_eq!(sent.len(), 5);
    }

    #[test]
    fn missing_enquiry_cancels() {
        let (code, _, sent) = run(Script::new().reply(b"garbage"));
        assert_eq!(code, ResultCode::Cancelled);
        assert!(sent.is_empty());
    }

    #[test]
    fn silence_in_loop_answers_can_and_cancels() {
        let script = handshake()
            .step(medlink_mock::Step::Silence)
            .reply([control::SOH, b'H'])
            .reply([control::EOT]);
        let mut transport = ScriptedTransport::new(script);
        let probe = transport.probe();
        let mut ctx = MeasurementContext::new("addr", params());
        let code = execute(&Sp350CopdDriver, &mut transport, &mut ctx);
        assert_eq!(code, ResultCode::Cancelled);
        assert_eq!(probe.sent().len(), 4);
        assert_eq!(probe.sent()[3], vec![control::CAN]);
        assert_eq!(probe.receives(), 5);
    }

    #[test]
    fn cancel_mid_transfer_ends_after_one_exchange() {
        let script = (0..10).fold(
            handshake().step(medlink_mock::Step::Hang),
            |s, _| s.reply([control::SOH, b'H']),
        );
        let mut transport = ScriptedTransport::new(script);
        let probe = transport.probe();
        let token = transport.cancel_token();
        let watcher = {
            let probe = probe.clone();
            std::thread::spawn(move || {
                while probe.receives() < 5 {
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                token.cancel();
            })
        };

        let mut ctx = MeasurementContext::new("addr", params());
        let code = execute(&Sp350CopdDriver, &mut transport, &mut ctx);
        watcher.join().unwrap();

        assert_eq!(code, ResultCode::Cancelled);
        assert_eq!(probe.receives(), 5);
        assert_eq!(probe.sent().last(), Some(&vec![control::CAN]));
        assert_eq!(ctx.budget.used(), 1);
    }

    #[test]
    fn endless_headers_exhaust_budget() {
        let script = (0..10).fold(handshake(), |s, _| s.reply([control::SOH]));
        let mut transport = ScriptedTransport::new(script);
        let limits = RunLimits {
            max_exchanges: 4,
            ..RunLimits::default()
        };
        let mut ctx = MeasurementContext::with_limits("addr", params(), &limits);
        assert_eq!(execute(&Sp350CopdDriver, &mut transport, &mut ctx), ResultCode::Cancelled);
    }

    #[test]
    fn non_numeric_result_cancels() {
        let script = handshake()
            .reply(data_record("0201", "VC\t3.10\tERR\t110\t"))
            .reply([control::EOT]);
        let (code, _, _) = run(script);
        assert_eq!(code, ResultCode::Cancelled);
    }
}

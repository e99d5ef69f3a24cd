//! Dry runs of drivers against scripted frames.
//!
//! A frame argument is either the path of a file holding the raw bytes or a
//! hex string (`"02 30 31 03"`, `"02303103"`). Each frame becomes one scripted
//! reception.

use std::path::Path;

use anyhow::{bail, Context, Result};
use medlink_core::{
    execute, transmit, DeviceModel, MeasurementContext, MeasurementResult, ResultCode, RunLimits,
    ValueVector,
};
use medlink_hardware::DriverRegistry;
use medlink_mock::{Script, ScriptedTransport};
use serde::Serialize;

/// Outcome of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Simulation {
    /// Model that was driven.
    pub model: DeviceModel,
    /// Result slots and code.
    pub result: MeasurementResult,
    /// Every write the driver made, hex encoded.
    pub sent: Vec<String>,
}

/// Parse a hex frame, ignoring whitespace.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("hex frame has an odd number of digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

/// Render bytes as space-separated hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Load one frame argument: an existing file, otherwise hex.
pub fn load_frame(arg: &str) -> Result<Vec<u8>> {
    let path = Path::new(arg);
    if path.is_file() {
        return std::fs::read(path).with_context(|| format!("cannot read frame file {arg}"));
    }
    parse_hex(arg).with_context(|| format!("'{arg}' is neither a file nor a hex frame"))
}

/// Parameter vector from command-line values; the first value lands in
/// slot 1.
pub fn params_from_args(args: &[String]) -> ValueVector {
    let slots: Vec<&str> = std::iter::once("")
        .chain(args.iter().map(String::as_str))
        .collect();
    ValueVector::from_slice(&slots)
}

/// Drive `model` against `frames` with a scripted transport.
pub fn run(
    registry: &DriverRegistry,
    model: DeviceModel,
    frames: Vec<Vec<u8>>,
    params: ValueVector,
    limits: &RunLimits,
) -> Simulation {
    let script = frames
        .into_iter()
        .fold(Script::new(), |script, frame| script.reply(frame));
    let mut transport = ScriptedTransport::new(script);
    let probe = transport.probe();
    let mut ctx = MeasurementContext::with_limits("simulated", params, limits);

    let result = if let Some(driver) = registry.receiver(model) {
        let code = execute(driver.as_ref(), &mut transport, &mut ctx);
        let mut values = ctx.values;
        if code == ResultCode::Success {
            values.trim_all();
        }
        MeasurementResult { values, code }
    } else if let Some(sender) = registry.sender(model) {
        MeasurementResult::from_code(transmit(sender.as_ref(), &mut transport, &ctx))
    } else {
        MeasurementResult::failed(ResultCode::IncompatibleDevice)
    };

    Simulation {
        model,
        result,
        sent: probe.sent().iter().map(|bytes| to_hex(bytes)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("02 30 31 03").unwrap(), vec![0x02, 0x30, 0x31, 0x03]);
        assert_eq!(parse_hex("0d0A").unwrap(), vec![0x0d, 0x0a]);
        assert!(parse_hex("123").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_load_frame_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"082.5cm\r\n").unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert_eq!(load_frame(&path).unwrap(), b"082.5cm\r\n");
    }

    #[test]
    fn test_params_start_at_slot_one() {
        let params = params_from_args(&["1".to_string(), "170.0".to_string()]);
        assert_eq!(params.get(0), "");
        assert_eq!(params.get(1), "1");
        assert_eq!(params.get(2), "170.0");
    }

    #[test]
    fn test_simulate_receiver() {
        let mut frame = vec![b' '; 40];
        frame[16..19].copy_from_slice(b"121");
        frame[25..28].copy_from_slice(b"078");
        frame[29..32].copy_from_slice(b"064");
        let sim = run(
            &DriverRegistry::builtin(),
            DeviceModel::Tm2580,
            vec![frame],
            ValueVector::new(),
            &RunLimits::default(),
        );
        assert_eq!(sim.result.code, ResultCode::Success);
        assert_eq!(sim.result.values.get(2), "78");
        assert_eq!(sim.sent, vec!["05 53 03".to_string()]);
    }

    #[test]
    fn test_simulate_sender_and_unknown() {
        let limits = RunLimits {
            settle: Some(Duration::ZERO),
            ..RunLimits::default()
        };
        let params = params_from_args(&[
            "55".into(),
            "YAMADA".into(),
            "YAMADA".into(),
            "19900214".into(),
            "2".into(),
            "1".into(),
        ]);
        let registry = DriverRegistry::builtin();
        let sim = run(&registry, DeviceModel::QrConnect, Vec::new(), params, &limits);
        assert_eq!(sim.result.code, ResultCode::Success);
        assert_eq!(sim.sent.len(), 1);
        assert!(sim.result.values.iter().all(str::is_empty));

        let sim = run(&registry, DeviceModel::Cv20, Vec::new(), ValueVector::new(), &limits);
        assert_eq!(sim.result.code, ResultCode::IncompatibleDevice);
        assert!(sim.sent.is_empty());
    }
}

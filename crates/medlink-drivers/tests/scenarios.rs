//! End-to-end driver scenarios over scripted transports.
//!
//! One scenario per protocol archetype, run through the same `execute`
//! boundary the orchestrator uses.

use medlink_core::codec::control;
use medlink_core::{
    execute, transmit, Driver, MeasurementContext, ResultCode, RunLimits, SendDriver, Transport,
    TransportStatus, ValueVector, SLOT_COUNT,
};
use medlink_drivers::*;
use medlink_mock::{Script, ScriptedTransport, Step};
use std::time::Duration;
use tracing_test::traced_test;

fn run_driver(driver: &dyn Driver, script: Script, params: &[&str]) -> (ResultCode, ValueVector) {
    let mut transport = ScriptedTransport::new(script);
    let mut ctx = MeasurementContext::new("/dev/rfcomm0", ValueVector::from_slice(params));
    let code = execute(driver, &mut transport, &mut ctx);
    (code, ctx.values)
}

fn printout_frame() -> Vec<u8> {
    let mut frame = vec![b' '; 1000];
    frame[33..39].copy_from_slice(b"0150.0");
    frame[41..47].copy_from_slice(b"0623.0");
    frame[54..58].copy_from_slice(b"21.5");
    frame
}

/// Fixed-offset frame: padded decimals are normalised.
#[test]
fn test_fixed_offset_printout() {
    let script = Script::new().reply(printout_frame());
    let (code, values) = run_driver(&PrintoutDriver::dc250t(), script, &[]);
    assert_eq!(code, ResultCode::Success);
    assert_eq!(values.get(1), "150.0");
    assert_eq!(values.get(2), "623.0");
    assert_eq!(values.len(), SLOT_COUNT);
}

/// Handshake: an unexpected tare acknowledgement ends the run.
#[test]
fn test_handshake_tare_mismatch() {
    let good = Script::new()
        .line("@")
        .line("D0,Pt,1.0")
        .line("@")
        .line("F0,Wk,70.2,");
    let (code, values) = run_driver(&Dc320Driver, good, &["", "0"]);
    assert_eq!(code, ResultCode::Success);
    assert_eq!(values.get(2), "70.2");

    let bad = Script::new().line("@").line("D0,Pt,2.0");
    let (code, values) = run_driver(&Dc320Driver, bad, &["", "0"]);
    assert_eq!(code, ResultCode::Cancelled);
    assert!(values.iter().all(str::is_empty));
}

/// A zero-length read at any step cancels with every slot empty.
#[traced_test]
#[test]
fn test_silence_cancels_every_driver() {
    let params = ["", "1", "170.0", "1", "45", "19800101", "45", "170.0", "65.0"];
    for driver in builtin_drivers() {
        let script = Script::new().step(Step::Silence);
        let mut transport = ScriptedTransport::new(script);
        let limits = RunLimits {
            max_exchanges: 4,
            ..RunLimits::default()
        };
        let mut ctx =
            MeasurementContext::with_limits("addr", ValueVector::from_slice(&params), &limits);
        let code = execute(driver.as_ref(), &mut transport, &mut ctx);
        assert_eq!(code, ResultCode::Cancelled, "{}", driver.model());
        assert!(ctx.values.iter().all(str::is_empty), "{}", driver.model());
    }
    assert!(logs_contain("driver step failed"));
}

/// Control-byte exchange: SOH, STX, EOT completes; CAN aborts.
#[test]
fn test_ack_nak_records() {
    let request = {
        let mut frame = vec![control::STX];
        frame.extend_from_slice(b"000000PATIENT000001");
        frame.push(control::ETX);
        frame
    };
    let handshake = || {
        Script::new()
            .reply([control::ENQ])
            .reply(request.clone())
            .reply([control::ACK])
            .reply([control::ENQ])
    };
    let params = ["", "12", "TANAKA", "", "2", "19700101", "54", "160.0", "55.0"];

    let mut record = vec![control::STX];
    record.extend_from_slice(b"000000202\tFVC\t3.2\t3.3\t3.40\t\t");
    record.push(control::ETX);
    let (code, values) = run_driver(
        &Sp350CopdDriver,
        handshake()
            .reply([control::SOH])
            .reply(record)
            .reply([control::EOT]),
        &params,
    );
    assert_eq!(code, ResultCode::Success);
    assert_eq!(values.get(6), "3.40");

    let mut transport = ScriptedTransport::new(
        handshake()
            .reply([control::SOH])
            .reply([control::CAN])
            .reply([control::EOT]),
    );
    let probe = transport.probe();
    let mut ctx = MeasurementContext::new("addr", ValueVector::from_slice(&params));
    assert_eq!(execute(&Sp350CopdDriver, &mut transport, &mut ctx), ResultCode::Cancelled);
    let sent = probe.sent();
    assert_eq!(sent.last(), Some(&vec![control::ACK]));
    assert_eq!(probe.receives(), 6);
}

/// Transport failures surface as their own result codes.
#[test]
fn test_connect_failure_maps_status() {
    let script = Script::new().connect_status(TransportStatus::Failed);
    let (code, _) = run_driver(&Tm2580Driver, script, &[]);
    assert_eq!(code, ResultCode::DeviceFailed);
    assert!(code.is_transport_failure());
}

/// Send-only: one write, no reads.
#[test]
fn test_senders_write_once() {
    // slot 4 and 5 each carry a birth date for one of the record layouts
    let params = ValueVector::from_slice(&[
        "", "1", "2", "NAME", "19800101", "19800101", "44", "170", "60",
    ]);
    for sender in builtin_senders() {
        let mut transport = ScriptedTransport::new(Script::new());
        let probe = transport.probe();
        let mut ctx = MeasurementContext::new("addr", params.clone());
        ctx.settle = Some(Duration::ZERO);
        let code = transmit(sender.as_ref(), &mut transport, &ctx);
        assert_eq!(code, ResultCode::Success, "{}", sender.model());
        assert_eq!(probe.sent().len(), 1);
        assert_eq!(probe.receives(), 0);
        transport.close();
    }
}

/// Senders compose without touching a transport.
#[test]
fn test_compose_is_pure() {
    let params = ValueVector::from_slice(&["", "1", "2", "NAME", "1", "19800101", "44"]);
    let sender = FukudaEcgSender::fcp4521();
    assert_eq!(sender.compose(&params).unwrap(), sender.compose(&params).unwrap());
}

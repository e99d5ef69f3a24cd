//! Tanita analysers driven in PC mode (DC-320, DC-250).
//!
//! The host switches the instrument into PC mode, sets the tare weight and,
//! for a body composition run, the subject's sex, body type, height and age.
//! Every command must be acknowledged by its expected reply prefix before the
//! next one is sent.
//!
//! # Parameters
//!
//! | Slot | DC-320 | DC-250 |
//! |------|--------|--------|
//! | 1    | mode   | mode   |
//! | 2    | height | sex    |
//! | 3    | sex    | age    |
//! | 4    | age    |        |
//!
//! Mode `"1"` is a body composition run; anything else weighs only.

use medlink_core::codec::{
    format_decimal, is_numeric, pad_left_zero, parse_decimal, parse_integer, tag_window,
};
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
};
use tracing::{debug, info};

use crate::handshake::{run_steps, wait_for_marker, HandshakeStep};

/// Mode parameter value selecting a body composition run.
const BODY_COMPOSITION: &str = "1";

/// Age used when the request leaves it blank.
const DEFAULT_AGE: &str = "30";

/// Normalise a decimal reading, keeping unparsable text for validation.
fn decimal_or_raw(raw: &str) -> String {
    parse_decimal(raw).map(format_decimal).unwrap_or_else(|| raw.trim().to_string())
}

/// Value after `tag`, `short` characters wide when followed by a comma and
/// `long` characters otherwise.
fn sized_tag(text: &str, tag: &str, short: usize, long: usize) -> Option<String> {
    let begin = text.find(tag)? + tag.len();
    let rest = &text[begin..];
    let width = if rest.chars().nth(short) == Some(',') { short } else { long };
    Some(rest.chars().take(width).collect())
}

fn require_numeric(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if is_numeric(value) {
        Ok(())
    } else {
        Err(ProtocolError::not_numeric(field, value))
    }
}

// =============================================================================
// DC-320
// =============================================================================

/// Tanita DC-320 in PC mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dc320Driver;

impl Dc320Driver {
    /// Two-character age command argument.
    fn age(raw: &str) -> Result<String, ProtocolError> {
        if raw.is_empty() {
            return Ok(DEFAULT_AGE.to_string());
        }
        match parse_integer(raw) {
            Some(0) | None => Err(ProtocolError::InvalidParameter {
                slot: 4,
                reason: format!("age {raw:?} is not accepted"),
            }),
            Some(_) => Ok(raw.chars().take(2).collect()),
        }
    }

    /// Command sequence for the requested mode.
    pub fn steps(mode: &str, height: &str, sex: &str, age: &str) -> Vec<HandshakeStep> {
        let mut steps = vec![
            HandshakeStep::new("pc_mode", "M1", "@"),
            HandshakeStep::new("tare", "D001.0", "D0,Pt,1.0"),
        ];
        if mode == BODY_COMPOSITION {
            steps.extend([
                HandshakeStep::new("sex", format!("D1{sex}"), "D1,GE,"),
                HandshakeStep::new("body_type", "D20", "D2,Bt,0"),
                HandshakeStep::new("height", format!("D3{height}"), "D3,Hm,"),
                HandshakeStep::new("age", format!("D4{age}"), "D4,AG,"),
                HandshakeStep::new("start", "G0", "@"),
            ]);
        } else {
            steps.push(HandshakeStep::new("start", "F0", "@"));
        }
        steps
    }
}

impl Driver for Dc320Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Dc320
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mode = ctx.param(1).to_string();
        let age = Self::age(ctx.param(4))?;
        let steps = Self::steps(&mode, ctx.param(2), ctx.param(3), &age);

        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        run_steps(&mut channel, &steps)?;

        let marker = if mode == BODY_COMPOSITION { "{0,16" } else { "F0,Wk," };
        let record = wait_for_marker(&mut channel, &mut ctx.budget, "result", marker)?;

        let weight = sized_tag(&record, "Wk,", 4, 5)
            .map_or_else(|| "0".to_string(), |w| decimal_or_raw(&w));
        let fat = sized_tag(&record, "FW,", 3, 4)
            .map_or_else(|| "0".to_string(), |f| decimal_or_raw(&f));
        require_numeric("weight", &weight)?;
        require_numeric("fat", &fat)?;

        info!(%weight, %fat, "DC-320 result");
        ctx.values.set(2, weight);
        ctx.values.set(3, fat);
        Ok(channel.finish())
    }
}

// =============================================================================
// DC-250
// =============================================================================

/// Tanita DC-250 in PC mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dc250PcmDriver;

impl Dc250PcmDriver {
    /// Two-digit, zero-padded age command argument.
    fn age(raw: &str) -> Result<String, ProtocolError> {
        if raw.is_empty() {
            return Ok(DEFAULT_AGE.to_string());
        }
        match parse_integer(raw).unwrap_or(0) {
            0 => Err(ProtocolError::InvalidParameter {
                slot: 3,
                reason: format!("age {raw:?} is not accepted"),
            }),
            age => Ok(pad_left_zero(&age.to_string(), 2)),
        }
    }

    /// Command sequence for the requested mode.
    pub fn steps(mode: &str, sex: &str, age: &str) -> Vec<HandshakeStep> {
        let mut steps = vec![
            HandshakeStep::new("pc_mode", "M1", "@"),
            HandshakeStep::new("tare", "D001.0", "D0,Pt,1.0"),
        ];
        if mode == BODY_COMPOSITION {
            steps.extend([
                HandshakeStep::new("sex", format!("D1{sex}"), "D1,GE,"),
                HandshakeStep::new("age", format!("D4{age}"), "D4,AG,"),
                HandshakeStep::new("body_type", "D20", "D2,Bt,0"),
                HandshakeStep::new("start", "G", "S6"),
            ]);
        } else {
            steps.push(HandshakeStep::new("start", "E", "S6"));
        }
        steps
    }

    fn weight(record: &str) -> String {
        let Some(window) = tag_window(record, "Wk,", 5) else {
            return String::new();
        };
        let trimmed = if let Some(stripped) = window.strip_suffix(',') {
            stripped.to_string()
        } else if window.ends_with('F') || window.ends_with('M') {
            window.chars().take(2).collect()
        } else {
            window
        };
        decimal_or_raw(&trimmed)
    }

    fn fat(record: &str) -> String {
        match tag_window(record, "FW,", 4) {
            Some(window) => decimal_or_raw(window.strip_suffix(',').unwrap_or(&window)),
            None => String::new(),
        }
    }
}

impl Driver for Dc250PcmDriver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Dc250Pcm
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let age = Self::age(ctx.param(3))?;
        let steps = Self::steps(ctx.param(1), ctx.param(2), &age);

        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;
        run_steps(&mut channel, &steps)?;
        let record = wait_for_marker(&mut channel, &mut ctx.budget, "result", "{0,16")?;

        let height = tag_window(&record, "Hm,", 5)
            .map(|h| decimal_or_raw(&h))
            .unwrap_or_default();
        let weight = Self::weight(&record);
        let fat = Self::fat(&record);

        require_numeric("height", &height)?;
        require_numeric("weight", &weight)?;
        if !fat.is_empty() {
            require_numeric("fat", &fat)?;
        }

        debug!(%height, %weight, %fat, "DC-250 result");
        ctx.values.set(1, height);
        ctx.values.set(2, weight);
        ctx.values.set(3, fat);
        Ok(channel.finish())
    }
}

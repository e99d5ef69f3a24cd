//! DTM-15 waist measure.
//!
//! On connect the tape replays its stored readings, so everything received
//! during a settle window is discarded and the last frame read once the
//! window has passed is taken as the measurement.

use std::time::{Duration, Instant};

use medlink_core::codec::FieldSpec;
use medlink_core::driver::DEFAULT_FRAME_CAPACITY;
use medlink_core::{
    Channel, DeviceModel, Driver, MeasurementContext, ProtocolError, ResultCode, Transport,
};
use tracing::{debug, trace};

const WAIST: FieldSpec = FieldSpec::text("waist", 1, 5);

/// Window during which replayed readings are ignored.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// DTM-15 waist measure. Waist in slot 1.
#[derive(Debug, Clone, Copy)]
pub struct Dtm15Driver {
    window: Duration,
}

impl Default for Dtm15Driver {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}

impl Dtm15Driver {
    /// Driver with a custom settle window.
    pub fn with_window(window: Duration) -> Self {
        Self { window }
    }
}

impl Driver for Dtm15Driver {
    fn model(&self) -> DeviceModel {
        DeviceModel::Dtm15
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        ctx: &mut MeasurementContext,
    ) -> Result<ResultCode, ProtocolError> {
        let mut channel = Channel::new(transport, DEFAULT_FRAME_CAPACITY);
        channel.connect(&ctx.address)?;

        let started = Instant::now();
        loop {
            ctx.budget.tick()?;
            let len = channel.receive("waist")?.len();
            trace!(len, elapsed = ?started.elapsed(), "frame during settle window");
            if started.elapsed() >= self.window {
                break;
            }
        }

        let field = WAIST.read(channel.frame().bytes())?;
        if !field.numeric {
            return Err(ProtocolError::rejected(WAIST.name, field.raw));
        }
        debug!(waist = %field.value, "waist measured");
        ctx.values.set(1, field.value);
        Ok(channel.finish())
    }
}

//! Tracing initialisation.
//!
//! Builds a `tracing_subscriber` registry with an [`EnvFilter`] and one of
//! three output formats. `RUST_LOG`, when set, overrides the configured
//! level.
//!
//! # Example
//! ```no_run
//! use medlink::tracing_init::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! let config = TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact);
//! tracing_init::init(config)?;
//! # Ok::<(), String>(())
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::AppConfig;

/// Log output format, selected by `[logging] format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured output for a terminal
    #[default]
    Pretty,
    /// One line per event, no colours
    Compact,
    /// One JSON object per event
    Json,
}

/// Crates whose events follow the configured level. Everything else is
/// held at `warn`.
const OWN_CRATES: [&str; 5] = [
    "medlink",
    "medlink_core",
    "medlink_drivers",
    "medlink_hardware",
    "medlink_mock",
];

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the medlink crates.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Emit span close events (one per driver run, with its duration).
    pub with_span_events: bool,
    /// Include source file and line.
    pub with_file_and_line: bool,
    /// Include thread names; driver runs show up on blocking workers.
    pub with_thread_names: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl TracingConfig {
    /// Settings from `[application] log_level` and `[logging] format`.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?)
            .with_format(config.logging.format))
    }

    /// Pretty output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        std::iter::once("warn".to_string())
            .chain(OWN_CRATES.iter().map(|krate| format!("{krate}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Initialise tracing from the application configuration.
pub fn init_from_config(config: &AppConfig) -> Result<(), String> {
    init(TracingConfig::from_app_config(config)?)
}

/// Install the global subscriber. Logs go to stderr so stdout carries only
/// results.
///
/// Idempotent: once a subscriber is installed, later calls return `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| format!("invalid {}: {e}", EnvFilter::DEFAULT_ENV))?,
        _ => EnvFilter::try_new(config.directives()).map_err(|e| e.to_string())?,
    };
    let span_events = if config.with_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    macro_rules! shared {
        ($layer:expr) => {
            $layer
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_writer(std::io::stderr)
                .boxed()
        };
    }
    let layer = match config.format {
        OutputFormat::Pretty => shared!(fmt::layer().pretty()),
        OutputFormat::Compact => shared!(fmt::layer().compact().with_ansi(false)),
        OutputFormat::Json => shared!(fmt::layer().json()),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        // Lost a race with another initialiser.
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(format!("cannot initialise tracing: {e}")),
    }
}

/// Parse a level name, case-insensitively.
fn parse_log_level(level: &str) -> Result<Level, String> {
    level.trim().parse::<Level>().map_err(|_| {
        format!("invalid log level '{level}', expected trace, debug, info, warn or error")
    })
}

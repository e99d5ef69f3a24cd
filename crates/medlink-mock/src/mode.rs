//! Timing modes for scripted transports.
//!
//! - **Instant**: zero delays, deterministic behaviour for unit tests
//! - **Realistic**: link-like delays for integration tests and dry runs

use std::time::Duration;

/// Operational mode of a scripted transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays.
    #[default]
    Instant,
    /// Delays from [`TimingConfig`] on every call.
    Realistic,
}

/// Delays applied in [`MockMode::Realistic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Link establishment time in milliseconds.
    pub connect_ms: u64,
    /// Per-call communication delay in milliseconds.
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// Typical serial-over-radio link.
    pub fn serial_link() -> Self {
        Self {
            connect_ms: 50,
            communication_delay_ms: 5,
        }
    }

    pub(crate) fn connect_delay(&self, mode: MockMode) -> Duration {
        match mode {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic => Duration::from_millis(self.connect_ms),
        }
    }

    pub(crate) fn call_delay(&self, mode: MockMode) -> Duration {
        match mode {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic => Duration::from_millis(self.communication_delay_ms),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::serial_link()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_instant_has_no_delay() {
        let timing = TimingConfig::serial_link();
        assert_eq!(timing.connect_delay(MockMode::Instant), Duration::ZERO);
        assert_eq!(timing.call_delay(MockMode::Instant), Duration::ZERO);
        assert_eq!(timing.call_delay(MockMode::Realistic), Duration::from_millis(5));
    }
}

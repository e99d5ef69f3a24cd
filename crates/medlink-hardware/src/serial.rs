//! Blocking serial transport.
//!
//! Reads poll the port in short slices so a [`CancelToken`] tripped by the
//! orchestrator is observed within one slice, even while the instrument is
//! silent.
//!
//! | Setting        | Default | Meaning                                   |
//! |----------------|---------|-------------------------------------------|
//! | `baud_rate`    | 9600    | line speed                                |
//! | `read_timeout` | 10 s    | longest wait for the first byte of a read |
//! | `poll_slice`   | 50 ms   | per-read port timeout, cancel granularity |
//!
//! Without a terminator a read ends at the first quiet slice after data has
//! arrived, so a frame streamed in several chunks is returned whole.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use medlink_core::{CancelToken, Reception, Transport, TransportFactory, TransportStatus};
use serialport::SerialPort;
use tracing::{debug, trace, warn};

/// Line and timing settings for serial links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Line speed.
    pub baud_rate: u32,
    /// Longest wait for a read to produce data.
    pub read_timeout: Duration,
    /// Port timeout per poll.
    pub poll_slice: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout: Duration::from_secs(10),
            poll_slice: Duration::from_millis(50),
        }
    }
}

/// [`Transport`] over a local serial device.
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
    cancel: CancelToken,
}

impl SerialTransport {
    /// Unconnected transport.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            cancel: CancelToken::new(),
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self, address: &str) -> TransportStatus {
        match serialport::new(address, self.settings.baud_rate)
            .timeout(self.settings.poll_slice)
            .open()
        {
            Ok(port) => {
                debug!(address, baud = self.settings.baud_rate, "serial port opened");
                self.port = Some(port);
                TransportStatus::Success
            }
            Err(err) => {
                warn!(address, error = %err, "cannot open serial port");
                match err.kind() {
                    serialport::ErrorKind::NoDevice
                    | serialport::ErrorKind::Io(ErrorKind::NotFound)
                    | serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                        TransportStatus::Failed
                    }
                    serialport::ErrorKind::InvalidInput => TransportStatus::Unsupported,
                    _ => TransportStatus::DriverError,
                }
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> TransportStatus {
        let Some(port) = self.port.as_mut() else {
            return TransportStatus::Failed;
        };
        match port.write_all(bytes).and_then(|()| port.flush()) {
            Ok(()) => {
                trace!(len = bytes.len(), "serial write");
                TransportStatus::Success
            }
            Err(err) => {
                warn!(error = %err, "serial write failed");
                TransportStatus::DriverError
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8], terminator: Option<&[u8]>) -> Reception {
        let Some(port) = self.port.as_mut() else {
            return Reception::empty(TransportStatus::Failed);
        };
        let deadline = Instant::now() + self.settings.read_timeout;
        let mut filled = 0;

        while filled < buf.len() {
            if self.cancel.is_cancelled() {
                debug!("receive cancelled");
                return Reception::empty(TransportStatus::Failed);
            }
            match port.read(&mut buf[filled..]) {
                Ok(0) => {}
                Ok(n) => {
                    filled += n;
                    if terminator.is_some_and(|t| buf[..filled].ends_with(t)) {
                        break;
                    }
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::TimedOut => {
                    if filled > 0 && terminator.is_none() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "serial read failed");
                    return Reception::empty(TransportStatus::DriverError);
                }
            }
            if Instant::now() >= deadline {
                trace!(filled, "read timeout");
                break;
            }
        }
        Reception::data(filled)
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }
}

/// Creates a [`SerialTransport`] per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialFactory {
    settings: SerialSettings,
}

impl SerialFactory {
    /// Factory with the given settings.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl TransportFactory for SerialFactory {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(SerialTransport::new(self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_transport_fails_quietly() {
        let mut transport = SerialTransport::new(SerialSettings::default());
        assert_eq!(transport.send(b"M1\r\n"), TransportStatus::Failed);
        let mut buf = [0u8; 8];
        assert_eq!(
            transport.receive(&mut buf, None),
            Reception::empty(TransportStatus::Failed)
        );
        transport.close();
        transport.close();
    }

    #[test]
    fn missing_device_is_not_success() {
        let mut transport = SerialTransport::new(SerialSettings::default());
        assert!(!transport.connect("/dev/medlink-does-not-exist").is_success());
    }

    #[test]
    fn factory_tokens_are_independent() {
        let factory = SerialFactory::default();
        let first = factory.create();
        let second = factory.create();
        first.cancel();
        assert!(first.cancel_token().is_cancelled());
        assert!(!second.cancel_token().is_cancelled());
    }
}

//! Scripted transports for medlink.
//!
//! This crate provides deterministic stand-ins for instrument links so drivers
//! and the orchestrator can be exercised without hardware.
//!
//! - [`ScriptedTransport`]: replays a [`Script`] of receptions and records sends
//! - [`ScriptedFactory`]: creates a fresh scripted transport per run
//! - [`TransportProbe`]: shared view of connects, sends, receives and closes
//!
//! ```rust
//! use medlink_core::Transport;
//! use medlink_mock::{Script, ScriptedTransport};
//!
//! let mut transport = ScriptedTransport::new(Script::new().line("@"));
//! let probe = transport.probe();
//! transport.connect("/dev/rfcomm0");
//! transport.send(b"M1\r\n");
//! assert_eq!(probe.sent(), vec![b"M1\r\n".to_vec()]);
//! ```

pub mod mode;
pub mod script;

pub use mode::{MockMode, TimingConfig};
pub use script::{Script, ScriptedFactory, ScriptedTransport, Step, TransportProbe};

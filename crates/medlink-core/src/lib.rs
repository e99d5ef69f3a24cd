//! `medlink-core`
//!
//! Core types and contracts for reading clinical instruments over a byte-stream
//! transport.
//!
//! Every instrument speaks its own wire protocol, but all drivers are built
//! from the same pieces:
//!
//! - **Codec primitives** ([`codec`]): block-check characters, parity, fixed-offset
//!   and tagged field extraction, numeric validation. Pure functions, no I/O.
//! - **Data model** ([`model`]): the 14-slot [`ValueVector`], requests, results and
//!   the closed [`ResultCode`] taxonomy.
//! - **Transport contract** ([`transport`]): the blocking `connect/send/receive/cancel/close`
//!   interface a driver talks through.
//! - **Driver contract** ([`driver`]): the receive-side [`Driver`] and transmit-side
//!   [`SendDriver`] traits plus the boundary functions that turn step failures into
//!   result codes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use medlink_core::codec::{bcc, BccMode};
//!
//! let check = bcc(b"\x0100\x02ST\x03", BccMode::Xor);
//! assert!(check.is_some());
//! ```

pub mod codec;
pub mod directory;
pub mod driver;
pub mod error;
pub mod model;
pub mod transport;

pub use directory::DeviceDirectory;
pub use driver::{
    execute, transmit, Channel, Driver, ExchangeBudget, MeasurementContext, RunLimits, SendDriver,
};
pub use error::ProtocolError;
pub use model::{
    Archetype, DeviceDescriptor, DeviceModel, Frame, MeasurementRequest, MeasurementResult,
    ParsedField, ResultCode, Strictness, ValueVector, SLOT_COUNT,
};
pub use transport::{CancelToken, Reception, Transport, TransportFactory, TransportStatus};

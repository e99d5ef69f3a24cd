//! Step-level protocol errors.
//!
//! Every fallible driver step returns `Result<_, ProtocolError>`. Errors never
//! cross the driver boundary: [`crate::driver::execute`] classifies them into a
//! [`ResultCode`] with [`ProtocolError::result_code`].
//!
//! | Variant              | Result code         |
//! |----------------------|---------------------|
//! | `EmptyRead`          | `Cancelled`         |
//! | `UnexpectedReply`    | `Cancelled`         |
//! | `FrameTooShort`      | `Cancelled`         |
//! | `NotNumeric`         | `Cancelled`         |
//! | `InstrumentCancel`   | `Cancelled`         |
//! | `Nak`                | `Cancelled`         |
//! | `BudgetExhausted`    | `Cancelled`         |
//! | `InvalidParameter`   | `Cancelled`         |
//! | `Transport(status)`  | mapped from status  |
//! | `Rejected`           | `MeasurementError`  |

use thiserror::Error;

use crate::model::ResultCode;
use crate::transport::TransportStatus;

/// Failure of one driver step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A receive returned no bytes (timeout, cancel or closed link).
    #[error("receive returned no data during {step}")]
    EmptyRead {
        /// Step that was waiting.
        step: &'static str,
    },

    /// A reply did not start with the expected prefix.
    #[error("step {step}: expected reply starting with {expected:?}, got {actual:?}")]
    UnexpectedReply {
        /// Step that sent the command.
        step: &'static str,
        /// Expected prefix.
        expected: String,
        /// Received text.
        actual: String,
    },

    /// A fixed-offset field lies past the end of the received frame.
    #[error("field {field} needs {needed} bytes, frame has {available}")]
    FrameTooShort {
        /// Field name.
        field: &'static str,
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A required value is present but not numeric.
    #[error("field {field} is not numeric: {value:?}")]
    NotNumeric {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// A final value failed validation after all steps completed.
    #[error("field {field} rejected: {value:?}")]
    Rejected {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// The instrument sent CAN.
    #[error("instrument cancelled the exchange")]
    InstrumentCancel,

    /// The instrument answered NAK.
    #[error("instrument answered NAK during {step}")]
    Nak {
        /// Step that was answered.
        step: &'static str,
    },

    /// A receive loop ran out of exchanges or time.
    #[error("receive loop exhausted after {exchanges} exchanges")]
    BudgetExhausted {
        /// Exchanges performed.
        exchanges: usize,
    },

    /// A request parameter cannot be sent to the instrument.
    #[error("parameter {slot} invalid: {reason}")]
    InvalidParameter {
        /// Parameter slot.
        slot: usize,
        /// Why it was refused.
        reason: String,
    },

    /// The transport reported a non-success status.
    #[error("transport reported {0}")]
    Transport(TransportStatus),
}

impl ProtocolError {
    /// Classify into the caller-facing result code.
    pub fn result_code(&self) -> ResultCode {
        match self {
            ProtocolError::Transport(status) => ResultCode::from(*status),
            ProtocolError::Rejected { .. } => ResultCode::MeasurementError,
            ProtocolError::EmptyRead { .. }
            | ProtocolError::UnexpectedReply { .. }
            | ProtocolError::FrameTooShort { .. }
            | ProtocolError::NotNumeric { .. }
            | ProtocolError::InstrumentCancel
            | ProtocolError::Nak { .. }
            | ProtocolError::BudgetExhausted { .. }
            | ProtocolError::InvalidParameter { .. } => ResultCode::Cancelled,
        }
    }

    /// Shorthand for [`ProtocolError::NotNumeric`].
    pub fn not_numeric(field: &'static str, value: impl Into<String>) -> Self {
        ProtocolError::NotNumeric {
            field,
            value: value.into(),
        }
    }

    /// Shorthand for [`ProtocolError::Rejected`].
    pub fn rejected(field: &'static str, value: impl Into<String>) -> Self {
        ProtocolError::Rejected {
            field,
            value: value.into(),
        }
    }
}

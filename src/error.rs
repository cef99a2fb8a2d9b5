//! Errors raised at the trace parsing boundary
//!
//! Every variant names the offending record and its position so the binary can
//! terminate with a diagnostic pointing at the exact line of the trace.

use thiserror::Error;

/// A trace record could not be turned into a [`crate::event::LockEvent`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown record at index {index}: unrecognized action '{action}'")]
    UnknownAction { index: u64, action: String },

    #[error("Record at position {position} is missing required field '{field}'")]
    MissingField { position: usize, field: &'static str },

    #[error("Malformed record at position {position}: {reason}")]
    MalformedRecord { position: usize, reason: String },

    #[error("Malformed caller chain at index {index}: '{chain}'")]
    MalformedCallerChain { index: u64, chain: String },

    #[error("Unknown record type '{record_type}' at position {position}")]
    UnknownRecordType { position: usize, record_type: String },
}

/// Result type for record parsing
pub type Result<T> = std::result::Result<T, ParseError>;

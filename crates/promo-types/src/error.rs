use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid promotion payload: {0}")]
    InvalidPayload(String),

    #[error("unknown value: {0}")]
    UnknownValue(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}

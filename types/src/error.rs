//! Top-level error type shared across crates.

use thiserror::Error;

/// Common error type for the Shoal data model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShoalError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid node status: {0}")]
    InvalidStatus(String),

    #[error("invalid network mode: {0}")]
    InvalidMode(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

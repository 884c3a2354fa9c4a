//! Crypto error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("canonical encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("signature does not verify for owner {0}")]
    BadSignature(String),

    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,
}

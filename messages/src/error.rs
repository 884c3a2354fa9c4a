//! Message decoding errors.

use thiserror::Error;

use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("unknown gossip route: {0}")]
    UnknownRoute(String),

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
}

use shoal_crypto::CryptoError;
use shoal_messages::MessageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{addr} is not reachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("no node answered the query")]
    NoResponses,

    #[error("nothing to query: node list is empty")]
    NoNodes,

    #[error("clock drift too large: {drift_ms}ms (max {max_ms}ms)")]
    ClockDrift { drift_ms: i64, max_ms: i64 },

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

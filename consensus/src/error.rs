use shoal_crypto::CryptoError;
use shoal_messages::{MessageError, SchemaError};
use shoal_types::CycleMarker;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("record {counter} does not link to the chain tip: previous {actual}, tip {expected}")]
    BrokenLink {
        counter: u64,
        expected: CycleMarker,
        actual: CycleMarker,
    },

    #[error("expected record {expected}, got {actual}")]
    CounterGap { expected: u64, actual: u64 },

    #[error("record {0} was already digested")]
    DuplicateDigest(u64),

    #[error("txlisthash mismatch digesting record {0}")]
    TxListHashMismatch(u64),

    #[error("nodeListHash mismatch digesting record {0}")]
    NodeListHashMismatch(u64),

    #[error("archiverListHash mismatch digesting record {0}")]
    ArchiverListHashMismatch(u64),

    #[error("standbyNodeListHash mismatch installing record {0}")]
    StandbyListHashMismatch(u64),

    #[error("cycle chain is empty")]
    EmptyChain,

    #[error("record schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    #[error("message: {0}")]
    Message(#[from] MessageError),

    #[error("submodule {name}: {reason}")]
    Submodule { name: &'static str, reason: String },

    #[error("{0}")]
    Other(String),
}

impl ConsensusError {
    /// Errors that mean this node's ledger no longer matches the network's.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::BrokenLink { .. }
                | Self::CounterGap { .. }
                | Self::DuplicateDigest(_)
                | Self::TxListHashMismatch(_)
                | Self::NodeListHashMismatch(_)
                | Self::ArchiverListHashMismatch(_)
                | Self::StandbyListHashMismatch(_)
        )
    }
}

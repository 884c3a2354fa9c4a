use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("consensus error: {0}")]
    Consensus(#[from] shoal_consensus::ConsensusError),

    #[error("network error: {0}")]
    Network(#[from] shoal_network::NetworkError),

    #[error("join refused: {0}")]
    Join(#[from] shoal_consensus::JoinError),

    #[error("crypto error: {0}")]
    Crypto(#[from] shoal_crypto::CryptoError),

    #[error("join refused by the network: {0}")]
    Refused(String),

    #[error("sync failed: {0}")]
    Sync(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("node not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RPC server error: {0}")]
    Rpc(#[from] shoal_rpc::RpcError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("shut down")]
    Shutdown,

    #[error("{0}")]
    Other(String),
}

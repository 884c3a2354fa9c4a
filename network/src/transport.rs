//! The transport seam.
//!
//! The engine never talks to sockets directly: gossip pushes and peer queries
//! go through [`Transport`]. Production uses [`crate::HttpTransport`]; tests
//! plug in an in-memory implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_messages::GossipEnvelope;
use shoal_types::{Archiver, Node, NodeInfo};
use std::fmt;

use crate::{reachability, NetworkError};

/// Where to reach a peer's external HTTP server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<&NodeInfo> for PeerAddr {
    fn from(info: &NodeInfo) -> Self {
        Self::new(info.external_ip.clone(), info.external_port)
    }
}

impl From<&Node> for PeerAddr {
    fn from(node: &Node) -> Self {
        Self::from(&node.info)
    }
}

impl From<&Archiver> for PeerAddr {
    fn from(a: &Archiver) -> Self {
        Self::new(a.ip.clone(), a.port)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Push one gossip envelope to a peer.
    async fn send_gossip(&self, to: &PeerAddr, envelope: &GossipEnvelope)
        -> Result<(), NetworkError>;

    /// `GET path` on a peer, returning the JSON body.
    async fn get_json(&self, to: &PeerAddr, path: &str) -> Result<Value, NetworkError>;

    /// `POST path` with a JSON body, returning the JSON body of the answer.
    async fn post_json(&self, to: &PeerAddr, path: &str, body: &Value)
        -> Result<Value, NetworkError>;

    /// Check that something accepts connections at `addr`.
    async fn probe(&self, addr: &PeerAddr) -> Result<(), NetworkError> {
        reachability::probe(&addr.ip, addr.port, reachability::DEFAULT_PROBE_TIMEOUT).await
    }
}

/// Typed `GET`.
pub async fn fetch<T: DeserializeOwned>(
    transport: &dyn Transport,
    to: &PeerAddr,
    path: &str,
) -> Result<T, NetworkError> {
    let value = transport.get_json(to, path).await?;
    Ok(serde_json::from_value(value)?)
}

/// Typed `POST`.
pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
    transport: &dyn Transport,
    to: &PeerAddr,
    path: &str,
    body: &B,
) -> Result<T, NetworkError> {
    let body = serde_json::to_value(body)?;
    let value = transport.post_json(to, path, &body).await?;
    Ok(serde_json::from_value(value)?)
}

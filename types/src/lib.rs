//! Fundamental types for the Shoal network.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! hashes and markers, keys, timestamps, node and archiver entries, the cycle
//! record, and the cycle parameters.

pub mod cycle;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod node;
pub mod params;
pub mod signed;
pub mod time;

pub use cycle::{CycleRecord, NetworkMode, NetworkTx, TxListEntry};
pub use error::ShoalError;
pub use hash::{CycleMarker, Hash256};
pub use keys::{CurvePublicKey, KeyPair, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use node::{
    Archiver, JoinedConsensor, Node, NodeId, NodeInfo, NodeStatus, SelectionNum, StandbyInfo,
};
pub use params::{CycleParams, JoinStrategy};
pub use signed::{Sign, Signed};
pub use time::{Clock, SystemClock, Timestamp};

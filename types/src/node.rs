//! Membership entries: consensus nodes, standby candidates, archivers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ShoalError;
use crate::hash::{CycleMarker, Hash256};
use crate::keys::{CurvePublicKey, PublicKey};

/// Stable node identifier: `blake2b(publicKey ‖ marker of the accepting cycle)`.
pub type NodeId = Hash256;

/// Deterministic fairness score ranking standby candidates.
pub type SelectionNum = Hash256;

/// Lifecycle status of a node in the node list. Removed nodes leave the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Syncing,
    Ready,
    Active,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syncing => "syncing",
            Self::Ready => "ready",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = ShoalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syncing" => Ok(Self::Syncing),
            "ready" => Ok(Self::Ready),
            "active" => Ok(Self::Active),
            other => Err(ShoalError::InvalidStatus(other.to_string())),
        }
    }
}

/// What a prospective node tells the network about itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub public_key: PublicKey,
    pub curve_public_key: CurvePublicKey,
    pub external_ip: String,
    pub external_port: u16,
    pub internal_ip: String,
    pub internal_port: u16,
}

impl NodeInfo {
    /// `ip:port` key used by the address index.
    pub fn external_addr(&self) -> String {
        format!("{}:{}", self.external_ip, self.external_port)
    }

    pub fn internal_addr(&self) -> String {
        format!("{}:{}", self.internal_ip, self.internal_port)
    }
}

/// A consensus node as tracked by the node list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub info: NodeInfo,
    pub status: NodeStatus,
    /// Seconds; first ordering key of the join-order view.
    pub join_request_timestamp: u64,
    /// Seconds; zero until the node is activated.
    pub active_timestamp: u64,
    pub cycle_joined: CycleMarker,
    pub counter_joined: u64,
}

impl Node {
    pub fn public_key(&self) -> &PublicKey {
        &self.info.public_key
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Entry of `joinedConsensors`: a node accepted into the network this cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedConsensor {
    pub id: NodeId,
    #[serde(flatten)]
    pub info: NodeInfo,
    pub join_request_timestamp: u64,
    pub cycle_joined: CycleMarker,
    pub counter_joined: u64,
}

impl JoinedConsensor {
    /// The node-list entry this consensor becomes once its record is digested.
    pub fn to_node(&self) -> Node {
        Node {
            id: self.id,
            info: self.info.clone(),
            status: NodeStatus::Syncing,
            join_request_timestamp: self.join_request_timestamp,
            active_timestamp: 0,
            cycle_joined: self.cycle_joined,
            counter_joined: self.counter_joined,
        }
    }
}

/// A validated candidate waiting in the standby list.
///
/// Entries carry no score. Candidates are ranked at each selection against
/// the newest marker, which did not exist when the request was signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandbyInfo {
    pub node_info: NodeInfo,
    /// Marker the join request was signed against.
    pub cycle_marker: CycleMarker,
    pub join_request_timestamp: u64,
    pub added_counter: u64,
    pub last_refresh_counter: u64,
}

impl StandbyInfo {
    pub fn public_key(&self) -> &PublicKey {
        &self.node_info.public_key
    }
}

/// A long-lived data sink that receives every cycle record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archiver {
    pub public_key: PublicKey,
    pub curve_public_key: CurvePublicKey,
    pub ip: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> NodeInfo {
        NodeInfo {
            public_key: PublicKey([1; 32]),
            curve_public_key: CurvePublicKey([2; 32]),
            external_ip: "10.0.0.1".into(),
            external_port: 9001,
            internal_ip: "127.0.0.1".into(),
            internal_port: 10001,
        }
    }

    #[test]
    fn status_parses() {
        assert_eq!("ready".parse::<NodeStatus>().unwrap(), NodeStatus::Ready);
        assert!("removed".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn node_json_is_flat_camel_case() {
        let node = JoinedConsensor {
            id: Hash256::new([3; 32]),
            info: info(),
            join_request_timestamp: 10,
            cycle_joined: Hash256::ZERO,
            counter_joined: 1,
        }
        .to_node();
        let v = serde_json::to_value(&node).unwrap();
        assert_eq!(v["externalPort"], 9001);
        assert_eq!(v["status"], "syncing");
        assert!(v.get("info").is_none());
    }

    #[test]
    fn addresses_format() {
        assert_eq!(info().external_addr(), "10.0.0.1:9001");
        assert_eq!(info().internal_addr(), "127.0.0.1:10001");
    }
}

//! The cycle record: one per cycle, pure data, hash-linked to its predecessor.
//!
//! Field names on the wire are camelCase (`joinedConsensors`, `nodeListHash`).
//! The marker of a record is the Blake2b hash of its JSON encoding, so every
//! list is kept sorted and duplicate free by [`CycleRecord::normalize`] before
//! hashing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ShoalError;
use crate::hash::{CycleMarker, Hash256};
use crate::keys::PublicKey;
use crate::network::NetworkId;
use crate::node::{Archiver, JoinedConsensor, NodeId, StandbyInfo};

/// Network-wide operating mode, driven by the active count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Forming,
    Processing,
    Safety,
    Recovery,
    Shutdown,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forming => "forming",
            Self::Processing => "processing",
            Self::Safety => "safety",
            Self::Recovery => "recovery",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = ShoalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forming" => Ok(Self::Forming),
            "processing" => Ok(Self::Processing),
            "safety" => Ok(Self::Safety),
            "recovery" => Ok(Self::Recovery),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(ShoalError::InvalidMode(other.to_string())),
        }
    }
}

/// An application-level network transaction carried by the service queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTx {
    /// Verifier key: the queue looks up the registered verifier by this.
    #[serde(rename = "type")]
    pub tx_type: String,
    pub tx_data: serde_json::Value,
    /// Counter of the cycle the tx was submitted in.
    pub cycle: u64,
    #[serde(default)]
    pub priority: u32,
}

/// A network transaction together with its content hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxListEntry {
    pub hash: Hash256,
    pub tx: NetworkTx,
}

impl TxListEntry {
    /// Ordering key of the running tx list.
    pub fn order_key(&self) -> (u64, u32, Hash256) {
        (self.tx.cycle, self.tx.priority, self.hash)
    }
}

/// One finalized (or in-progress) cycle record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub network_id: NetworkId,
    pub counter: u64,
    pub previous: CycleMarker,
    /// Seconds since epoch.
    pub start: u64,
    /// Seconds.
    pub duration: u64,
    pub mode: NetworkMode,

    // Counts after this record is digested.
    pub active: u32,
    pub syncing: u32,
    pub standby: u32,
    pub desired: u32,

    // Join
    pub joined_consensors: Vec<JoinedConsensor>,
    pub standby_add: Vec<StandbyInfo>,
    pub standby_remove: Vec<PublicKey>,
    pub standby_refresh: Vec<PublicKey>,
    pub standby_node_list_hash: Hash256,
    pub started_syncing: Vec<NodeId>,
    pub finished_syncing: Vec<NodeId>,

    // Active
    pub activated: Vec<NodeId>,
    /// Parallel to `activated`.
    pub activated_public_keys: Vec<PublicKey>,

    // Removal
    pub removed: Vec<NodeId>,
    pub apoptosized: Vec<NodeId>,
    pub lost: Vec<NodeId>,
    pub refuted: Vec<NodeId>,

    // Archivers
    pub joined_archivers: Vec<Archiver>,
    pub lost_archivers: Vec<PublicKey>,
    pub refuted_archivers: Vec<PublicKey>,
    pub removed_archivers: Vec<PublicKey>,
    pub archiver_list_hash: Hash256,

    // Service queue
    pub txadd: Vec<TxListEntry>,
    pub txremove: Vec<Hash256>,
    pub txlisthash: Hash256,

    pub node_list_hash: Hash256,
}

fn sort_dedup<T: Ord>(v: &mut Vec<T>) {
    v.sort();
    v.dedup();
}

impl CycleRecord {
    /// An empty record following `previous`. Submodules fill in their fields.
    pub fn skeleton(
        network_id: NetworkId,
        counter: u64,
        previous: CycleMarker,
        start: u64,
        duration: u64,
    ) -> Self {
        Self {
            network_id,
            counter,
            previous,
            start,
            duration,
            mode: NetworkMode::Forming,
            active: 0,
            syncing: 0,
            standby: 0,
            desired: 0,
            joined_consensors: Vec::new(),
            standby_add: Vec::new(),
            standby_remove: Vec::new(),
            standby_refresh: Vec::new(),
            standby_node_list_hash: Hash256::ZERO,
            started_syncing: Vec::new(),
            finished_syncing: Vec::new(),
            activated: Vec::new(),
            activated_public_keys: Vec::new(),
            removed: Vec::new(),
            apoptosized: Vec::new(),
            lost: Vec::new(),
            refuted: Vec::new(),
            joined_archivers: Vec::new(),
            lost_archivers: Vec::new(),
            refuted_archivers: Vec::new(),
            removed_archivers: Vec::new(),
            archiver_list_hash: Hash256::ZERO,
            txadd: Vec::new(),
            txremove: Vec::new(),
            txlisthash: Hash256::ZERO,
            node_list_hash: Hash256::ZERO,
        }
    }

    /// Milliseconds since epoch at which this cycle starts.
    pub fn start_ms(&self) -> u64 {
        self.start.saturating_mul(1000)
    }

    /// Milliseconds since epoch at which this cycle ends.
    pub fn end_ms(&self) -> u64 {
        self.start.saturating_add(self.duration).saturating_mul(1000)
    }

    /// Sort every list and drop duplicates so that equal content always
    /// encodes to equal bytes.
    pub fn normalize(&mut self) {
        self.joined_consensors.sort_by(|a, b| a.id.cmp(&b.id));
        self.joined_consensors.dedup_by(|a, b| a.id == b.id);

        self.standby_add
            .sort_by(|a, b| a.public_key().cmp(b.public_key()));
        self.standby_add
            .dedup_by(|a, b| a.public_key() == b.public_key());
        sort_dedup(&mut self.standby_remove);
        sort_dedup(&mut self.standby_refresh);
        sort_dedup(&mut self.started_syncing);
        sort_dedup(&mut self.finished_syncing);

        let mut pairs: Vec<(NodeId, PublicKey)> = self
            .activated
            .iter()
            .copied()
            .zip(self.activated_public_keys.iter().copied())
            .collect();
        sort_dedup(&mut pairs);
        self.activated = pairs.iter().map(|(id, _)| *id).collect();
        self.activated_public_keys = pairs.into_iter().map(|(_, pk)| pk).collect();

        sort_dedup(&mut self.removed);
        sort_dedup(&mut self.apoptosized);
        sort_dedup(&mut self.lost);
        sort_dedup(&mut self.refuted);

        self.joined_archivers
            .sort_by(|a, b| a.public_key.cmp(&b.public_key));
        self.joined_archivers
            .dedup_by(|a, b| a.public_key == b.public_key);
        sort_dedup(&mut self.lost_archivers);
        sort_dedup(&mut self.refuted_archivers);
        sort_dedup(&mut self.removed_archivers);

        self.txadd.sort_by_key(|e| e.order_key());
        self.txadd.dedup_by(|a, b| a.hash == b.hash);
        sort_dedup(&mut self.txremove);
    }

    /// Whether `normalize` would leave this record unchanged.
    pub fn is_normalized(&self) -> bool {
        let mut copy = self.clone();
        copy.normalize();
        &copy == self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        Hash256::new([b; 32])
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let mut r = CycleRecord::skeleton(NetworkId::Dev, 1, Hash256::ZERO, 100, 60);
        r.removed = vec![id(3), id(1), id(3)];
        r.activated = vec![id(9), id(2)];
        r.activated_public_keys = vec![PublicKey([9; 32]), PublicKey([2; 32])];
        assert!(!r.is_normalized());

        r.normalize();
        assert_eq!(r.removed, vec![id(1), id(3)]);
        assert_eq!(r.activated, vec![id(2), id(9)]);
        assert_eq!(r.activated_public_keys, vec![PublicKey([2; 32]), PublicKey([9; 32])]);
        assert!(r.is_normalized());
    }

    #[test]
    fn wire_names_are_camel_case() {
        let r = CycleRecord::skeleton(NetworkId::Dev, 0, Hash256::ZERO, 100, 60);
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("joinedConsensors").is_some());
        assert!(v.get("nodeListHash").is_some());
        assert!(v.get("txlisthash").is_some());
        assert_eq!(v["mode"], "forming");
    }

    #[test]
    fn end_is_start_plus_duration() {
        let r = CycleRecord::skeleton(NetworkId::Dev, 0, Hash256::ZERO, 100, 60);
        assert_eq!(r.start_ms(), 100_000);
        assert_eq!(r.end_ms(), 160_000);
    }

    #[test]
    fn txadd_orders_by_cycle_then_priority() {
        let entry = |cycle, priority, h| TxListEntry {
            hash: Hash256::new([h; 32]),
            tx: NetworkTx {
                tx_type: "t".into(),
                tx_data: serde_json::Value::Null,
                cycle,
                priority,
            },
        };
        let mut r = CycleRecord::skeleton(NetworkId::Dev, 0, Hash256::ZERO, 0, 60);
        r.txadd = vec![entry(2, 0, 1), entry(1, 5, 2), entry(1, 0, 9)];
        r.normalize();
        let keys: Vec<_> = r.txadd.iter().map(|e| e.hash.as_bytes()[0]).collect();
        assert_eq!(keys, vec![9, 2, 1]);
    }
}

//! Bodies of the signed per-cycle proposals.
//!
//! Each body is wrapped in [`shoal_types::Signed`] before it is gossiped; the
//! signature owner is the submitter. Wire field names are camelCase.

use serde::{Deserialize, Serialize};
use shoal_types::{CycleMarker, Hash256, NodeId, NodeInfo, PublicKey};

/// A prospective node asking to join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub node_info: NodeInfo,
    /// Marker of the newest cycle the candidate saw when it signed.
    pub cycle_marker: CycleMarker,
    /// Seconds.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A standby candidate withdrawing voluntarily.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnjoinRequest {
    pub public_key: PublicKey,
    pub timestamp: u64,
}

/// A standby candidate proving it is still alive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandbyRefresh {
    pub public_key: PublicKey,
    pub cycle_number: u64,
}

/// A selected node announcing that it began syncing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStarted {
    pub node_id: NodeId,
    pub cycle_number: u64,
}

/// A syncing node announcing that it is ready.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFinished {
    pub node_id: NodeId,
    pub cycle_number: u64,
}

/// A ready node asking to go active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest {
    pub node_id: NodeId,
    pub timestamp: u64,
    pub cycle_number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

/// An active node's vote to grow or shrink `desired`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRequest {
    pub node_id: NodeId,
    pub timestamp: u64,
    /// Cycle counter the vote is meant for.
    pub counter: u64,
    pub scale: ScaleDirection,
}

/// Removal of an entry from the running tx list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTx {
    pub tx_hash: Hash256,
    pub cycle: u64,
}

/// An active node reporting that `target` stopped answering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostReport {
    pub target: NodeId,
    pub checker: NodeId,
    pub cycle: u64,
}

/// A node refuting a lost report against itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostUp {
    pub target: NodeId,
    pub cycle: u64,
}

/// An active node reporting an unreachable archiver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostArchiverDown {
    pub archiver: PublicKey,
    pub investigator: NodeId,
    pub cycle: u64,
}

/// An archiver refuting a lost report against itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostArchiverUp {
    pub archiver: PublicKey,
    pub cycle: u64,
}

/// A node announcing its own removal, effective in cycle `when`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApoptosisProposal {
    pub id: NodeId,
    pub when: u64,
}

//! Request and response bodies of the HTTP routes.

use serde::{Deserialize, Serialize};
use shoal_types::{CycleMarker, CycleRecord, Hash256, Node, NodeId, PublicKey};

/// `GET /cyclemarker`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMarkerResponse {
    pub current_cycle_marker: CycleMarker,
    pub counter: u64,
    pub start: u64,
    pub duration: u64,
}

/// `POST /join` result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub success: bool,
    /// Set when the candidate should not retry this cycle.
    #[serde(default)]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_standby_nodes: Option<u32>,
}

impl JoinResponse {
    pub fn accepted(num_standby_nodes: Option<u32>) -> Self {
        Self {
            success: true,
            num_standby_nodes,
            ..Self::default()
        }
    }

    pub fn rejected(reason: impl Into<String>, fatal: bool) -> Self {
        Self {
            success: false,
            fatal,
            reason: Some(reason.into()),
            num_standby_nodes: None,
        }
    }
}

/// `GET /joined/:publicKey`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedResponse {
    pub node: Option<Node>,
}

/// `GET /joinedV2/:publicKey`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedV2Response {
    /// Node id once the candidate has been selected.
    pub id: Option<NodeId>,
    pub is_on_standby_list: bool,
}

/// `GET /sync-newest-cycle`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewestCycleResponse {
    pub newest_cycle: Option<CycleRecord>,
}

/// Plain acknowledgement of a `POST`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub const OK: Self = Self { success: true };
}

/// `POST /sync-cycles`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCyclesRequest {
    pub start: u64,
    pub end: u64,
}

/// Responses of the hash routes used by list sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashResponse {
    pub hash: Hash256,
}

/// Body of `POST /accepted`, sent to a selected candidate at Q1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedNotice {
    pub public_key: PublicKey,
    /// Marker of the record whose `joinedConsensors` includes the candidate.
    pub cycle_marker: CycleMarker,
    pub counter: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_join_carries_reason() {
        let json = serde_json::to_value(JoinResponse::rejected("unreachable", true)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["fatal"], true);
        assert_eq!(json["reason"], "unreachable");
        assert!(json.get("numStandbyNodes").is_none());
    }

    #[test]
    fn accepted_join_reports_standby_size() {
        let json = serde_json::to_value(JoinResponse::accepted(Some(4))).unwrap();
        assert_eq!(json["numStandbyNodes"], 4);
    }
}

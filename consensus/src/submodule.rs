//! The contract every cycle submodule implements.
//!
//! A submodule owns one slice of the cycle record. Each cycle it is reset at
//! Q1, collects signed proposals by gossip during Q1-Q2, exports them with
//! [`Submodule::get_txs`] at Q3, writes its fields with
//! [`Submodule::update_record`], and at Q4 turns the finalized record back
//! into node-list changes and persistent state.

use serde_json::Value;
use shoal_crypto::{verify_obj, CryptoError};
use shoal_messages::payloads::*;
use shoal_messages::{schema, GossipPayload, SchemaError};
use shoal_types::{
    CycleMarker, CycleParams, CycleRecord, Hash256, NetworkId, NodeId, PublicKey,
    Signed, StandbyInfo, TxListEntry,
};

use crate::archivers::ArchiverList;
use crate::error::ConsensusError;
use crate::nodelist::{Change, NodeList};
use crate::quarter::Quarter;

/// Read-only view of the engine handed to submodules.
#[derive(Clone, Copy)]
pub struct CycleContext<'a> {
    pub params: &'a CycleParams,
    pub network_id: NetworkId,
    pub nodes: &'a NodeList,
    pub archivers: &'a ArchiverList,
    /// Newest digested record.
    pub prev: Option<&'a CycleRecord>,
    pub prev_marker: Option<CycleMarker>,
    /// Counter of the cycle in progress.
    pub counter: u64,
    pub quarter: Option<Quarter>,
    pub self_id: Option<NodeId>,
}

impl CycleContext<'_> {
    /// Whether `marker` is recent enough to sign a proposal against: the
    /// newest record's marker or the one before it.
    pub fn is_recent_marker(&self, marker: &CycleMarker) -> bool {
        self.prev_marker.as_ref() == Some(marker)
            || self.prev.is_some_and(|p| p.counter > 0 && &p.previous == marker)
    }

    /// The node with this id, if `signer` is its public key.
    pub fn node_signed_by(&self, id: &NodeId, signer: &PublicKey) -> Option<&shoal_types::Node> {
        self.nodes
            .get(id)
            .filter(|n| n.public_key() == signer)
    }
}

/// What a submodule made of an incoming gossip payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipVerdict {
    /// Applied; forward it.
    Accepted,
    /// Already known or no longer relevant; drop quietly.
    Ignored(String),
    /// Invalid for this cycle; drop.
    Rejected(String),
    /// Needs an async verifier before it is applied.
    NeedsVerification,
}

impl GossipVerdict {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored(reason.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Everything the submodules collected for one cycle, exported at Q3.
///
/// Every list is in a canonical order so that equal inputs build equal
/// records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleTxs {
    pub joins: Vec<Signed<JoinRequest>>,
    pub standby_adds: Vec<StandbyInfo>,
    pub selected: Vec<StandbyInfo>,
    pub unjoins: Vec<PublicKey>,
    pub standby_refreshes: Vec<PublicKey>,
    pub sync_started: Vec<NodeId>,
    pub sync_finished: Vec<NodeId>,
    pub active: Vec<NodeId>,
    pub scale_up: Vec<NodeId>,
    pub scale_down: Vec<NodeId>,
    pub txadd: Vec<TxListEntry>,
    pub txremove: Vec<Hash256>,
    pub lost: Vec<(NodeId, Vec<NodeId>)>,
    pub lost_up: Vec<NodeId>,
    pub lost_archivers: Vec<(PublicKey, Vec<NodeId>)>,
    pub lost_archivers_up: Vec<PublicKey>,
    pub apoptosis: Vec<NodeId>,
}

pub trait Submodule: Send {
    fn name(&self) -> &'static str;

    /// Gossip routes this submodule handles.
    fn routes(&self) -> &'static [&'static str];

    /// Called once the first record is digested or installed.
    fn init(&mut self, _ctx: &CycleContext<'_>) {}

    /// Drop per-cycle state at the start of cycle `counter`.
    fn reset(&mut self, counter: u64);

    /// Queue a payload this node originates, sent at the next Q1.
    fn queue_request(&mut self, _payload: GossipPayload) {}

    /// Drain queued payloads.
    fn send_requests(&mut self) -> Vec<GossipPayload> {
        Vec::new()
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict;

    fn get_txs(&self, txs: &mut CycleTxs);

    /// Fill this submodule's record fields. Must depend only on the arguments.
    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError>;

    /// Structural check of this submodule's fields in a raw record.
    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError>;

    /// Node-list changes implied by this submodule's fields.
    fn parse_record(&self, _record: &CycleRecord) -> Change {
        Change::default()
    }

    /// Fold a finalized record into persistent state.
    fn digest(&mut self, _record: &CycleRecord, _ctx: &CycleContext<'_>) -> Result<(), ConsensusError> {
        Ok(())
    }
}

/// Check the signature on any gossip payload.
pub fn verify_payload(payload: &GossipPayload) -> Result<(), CryptoError> {
    match payload {
        GossipPayload::Join(s) | GossipPayload::ValidJoinRequest(s) => verify_obj(s),
        GossipPayload::Unjoin(s) => verify_obj(s),
        GossipPayload::SyncStarted(s) => verify_obj(s),
        GossipPayload::SyncFinished(s) => verify_obj(s),
        GossipPayload::StandbyRefresh(s) => verify_obj(s),
        GossipPayload::Active(s) => verify_obj(s),
        GossipPayload::Scaling(s) => verify_obj(s),
        GossipPayload::AddTx(s) => verify_obj(s),
        GossipPayload::RemoveTx(s) => verify_obj(s),
        GossipPayload::LostDown(s) => verify_obj(s),
        GossipPayload::LostUp(s) => verify_obj(s),
        GossipPayload::LostArchiverDown(s) => verify_obj(s),
        GossipPayload::LostArchiverUp(s) => verify_obj(s),
        GossipPayload::Apoptosize(s) => verify_obj(s),
    }
}

/// Validate the listed record fields against `specs`.
pub(crate) fn validate_fields(
    record: &Value,
    specs: &[schema::FieldSpec],
) -> Result<(), SchemaError> {
    schema::validate(record, specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_crypto::{keypair_from_seed, sign_obj};

    #[test]
    fn verify_payload_checks_owner() {
        let kp = keypair_from_seed(&[4; 32]);
        let body = ApoptosisProposal {
            id: Hash256::new([1; 32]),
            when: 3,
        };
        let mut signed = sign_obj(body, &kp).unwrap();
        assert!(verify_payload(&GossipPayload::Apoptosize(signed.clone())).is_ok());

        signed.body.when = 4;
        assert!(verify_payload(&GossipPayload::Apoptosize(signed)).is_err());
    }
}

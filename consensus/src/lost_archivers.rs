//! Lost archiver detection.
//!
//! Each archiver is investigated by the active node that follows its public
//! key on the id ring. An investigator that cannot reach the archiver gossips
//! `lost-archiver-down`; the archiver lands in `lostArchivers[]`. The archiver
//! may answer with a self-signed `lost-archiver-up` in the next cycle,
//! otherwise it is removed. Every record carries the hash of the archiver
//! list after its joins and removals.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, GossipPayload, SchemaError};
use shoal_types::{CycleRecord, Hash256, NodeId, PublicKey};
use std::collections::{BTreeMap, BTreeSet};

use crate::archivers::ArchiverList;
use crate::error::ConsensusError;
use crate::nodelist::NodeList;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("joinedArchivers", FieldKind::Arr),
    FieldSpec::req("lostArchivers", FieldKind::Arr),
    FieldSpec::req("refutedArchivers", FieldKind::Arr),
    FieldSpec::req("removedArchivers", FieldKind::Arr),
    FieldSpec::req("archiverListHash", FieldKind::Hex(32)),
];

const ROUTES: &[&str] = &[routes::LOST_ARCHIVER_DOWN, routes::LOST_ARCHIVER_UP];

/// The active node responsible for probing `archiver`.
pub fn investigator_of(nodes: &NodeList, archiver: &PublicKey) -> Option<NodeId> {
    nodes
        .ring_successor(&Hash256::new(archiver.0))
        .map(|n| n.id)
}

/// Archivers `self_id` is responsible for probing.
pub fn archivers_for(self_id: &NodeId, nodes: &NodeList, archivers: &ArchiverList) -> Vec<PublicKey> {
    archivers
        .iter()
        .map(|a| a.public_key)
        .filter(|pk| investigator_of(nodes, pk).as_ref() == Some(self_id))
        .collect()
}

#[derive(Debug, Default)]
pub struct LostArchivers {
    reports: BTreeMap<PublicKey, BTreeSet<NodeId>>,
    ups: BTreeSet<PublicKey>,
    queued: Vec<GossipPayload>,
}

impl LostArchivers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Submodule for LostArchivers {
    fn name(&self) -> &'static str {
        "lost-archivers"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, _counter: u64) {
        self.reports.clear();
        self.ups.clear();
    }

    fn queue_request(&mut self, payload: GossipPayload) {
        self.queued.push(payload);
    }

    fn send_requests(&mut self) -> Vec<GossipPayload> {
        std::mem::take(&mut self.queued)
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        match payload {
            GossipPayload::LostArchiverDown(req) => {
                let down = &req.body;
                if down.cycle != ctx.counter {
                    return GossipVerdict::rejected("lost archiver report for another cycle");
                }
                if !ctx.archivers.contains(&down.archiver) {
                    return GossipVerdict::ignored("unknown archiver");
                }
                if self
                    .reports
                    .get(&down.archiver)
                    .is_some_and(|s| s.contains(&down.investigator))
                {
                    return GossipVerdict::ignored("lost archiver report already seen");
                }
                if ctx.node_signed_by(&down.investigator, req.owner()).is_none() {
                    return GossipVerdict::rejected("report not signed by the investigator");
                }
                if investigator_of(ctx.nodes, &down.archiver) != Some(down.investigator) {
                    return GossipVerdict::rejected("reporter is not the archiver's investigator");
                }
                self.reports
                    .entry(down.archiver)
                    .or_default()
                    .insert(down.investigator);
                GossipVerdict::Accepted
            }
            GossipPayload::LostArchiverUp(req) => {
                let up = &req.body;
                if up.cycle != ctx.counter {
                    return GossipVerdict::rejected("lost archiver up for another cycle");
                }
                if req.owner() != &up.archiver {
                    return GossipVerdict::rejected("lost archiver up not signed by the archiver");
                }
                if !self.ups.insert(up.archiver) {
                    return GossipVerdict::ignored("lost archiver up already seen");
                }
                GossipVerdict::Accepted
            }
            _ => GossipVerdict::rejected("unexpected route"),
        }
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        txs.lost_archivers = self
            .reports
            .iter()
            .map(|(pk, investigators)| (*pk, investigators.iter().copied().collect()))
            .collect();
        txs.lost_archivers_up = self.ups.iter().copied().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        record.lost_archivers = txs
            .lost_archivers
            .iter()
            .map(|(pk, _)| *pk)
            .filter(|pk| !txs.lost_archivers_up.contains(pk) && ctx.archivers.contains(pk))
            .collect();
        if let Some(prev) = prev {
            let (refuted, unrefuted): (Vec<PublicKey>, Vec<PublicKey>) = prev
                .lost_archivers
                .iter()
                .copied()
                .partition(|pk| txs.lost_archivers_up.contains(pk));
            record.refuted_archivers = refuted;
            record.removed_archivers = unrefuted
                .into_iter()
                .filter(|pk| ctx.archivers.contains(pk))
                .collect();
        }
        record.archiver_list_hash = ctx
            .archivers
            .with_changes(&record.joined_archivers, &record.removed_archivers)
            .hash()?;
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }
}

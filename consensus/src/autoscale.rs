//! Votes to grow or shrink the network's `desired` size.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, GossipPayload, ScaleDirection, SchemaError};
use shoal_types::{CycleRecord, NodeId};
use std::collections::BTreeMap;

use crate::error::ConsensusError;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[FieldSpec::req("desired", FieldKind::Num)];

const ROUTES: &[&str] = &[routes::SCALING];

#[derive(Debug, Default)]
pub struct CycleAutoScale {
    votes: BTreeMap<NodeId, ScaleDirection>,
    queued: Vec<GossipPayload>,
}

impl CycleAutoScale {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn votes(&self) -> usize {
        self.votes.len()
    }
}

impl Submodule for CycleAutoScale {
    fn name(&self) -> &'static str {
        "autoscale"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, _counter: u64) {
        self.votes.clear();
    }

    fn queue_request(&mut self, payload: GossipPayload) {
        self.queued.push(payload);
    }

    fn send_requests(&mut self) -> Vec<GossipPayload> {
        std::mem::take(&mut self.queued)
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        let GossipPayload::Scaling(req) = payload else {
            return GossipVerdict::rejected("unexpected route");
        };
        let id = req.body.node_id;
        // one vote per node per cycle; the first one counts
        if self.votes.contains_key(&id) {
            return GossipVerdict::ignored("node already voted this cycle");
        }
        let Some(node) = ctx.node_signed_by(&id, req.owner()) else {
            return GossipVerdict::rejected("scale vote not signed by the node");
        };
        if !node.is_active() {
            return GossipVerdict::rejected("scale vote from inactive node");
        }
        if req.body.counter != ctx.counter {
            return GossipVerdict::rejected("scale vote for another cycle");
        }
        self.votes.insert(id, req.body.scale);
        GossipVerdict::Accepted
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        for (id, dir) in &self.votes {
            match dir {
                ScaleDirection::Up => txs.scale_up.push(*id),
                ScaleDirection::Down => txs.scale_down.push(*id),
            }
        }
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let params = ctx.params;
        let Some(prev) = prev else {
            record.desired = params.min_nodes;
            return Ok(());
        };
        let needed = params.scale_reqs_needed as usize;
        let mut desired = prev.desired;
        if txs.scale_up.len() >= needed {
            desired = desired.saturating_add(params.amount_to_grow);
        } else if txs.scale_down.len() >= needed {
            desired = desired.saturating_sub(params.amount_to_shrink);
        }
        record.desired = desired.clamp(params.min_nodes, params.max_nodes.max(params.min_nodes));
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }
}

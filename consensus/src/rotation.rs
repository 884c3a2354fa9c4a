//! Downsizing in processing mode: the oldest active nodes leave first.
//!
//! Rotation also owns the parse of `removed[]`, which collects sync
//! timeouts, unrefuted lost nodes and rotated nodes.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{GossipPayload, SchemaError};
use shoal_types::{CycleRecord, NetworkMode, NodeId};
use std::collections::HashSet;

use crate::error::ConsensusError;
use crate::join::calculate_to_accept;
use crate::nodelist::Change;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[FieldSpec::req("removed", FieldKind::Arr)];

#[derive(Debug, Default)]
pub struct Rotation;

impl Rotation {
    pub fn new() -> Self {
        Self
    }
}

impl Submodule for Rotation {
    fn name(&self) -> &'static str {
        "rotation"
    }

    fn routes(&self) -> &'static [&'static str] {
        &[]
    }

    fn reset(&mut self, _counter: u64) {}

    fn handle_gossip(&mut self, _payload: &GossipPayload, _ctx: &CycleContext<'_>) -> GossipVerdict {
        GossipVerdict::rejected("rotation takes no gossip")
    }

    fn get_txs(&self, _txs: &mut CycleTxs) {}

    fn update_record(
        &self,
        _txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let Some(prev) = prev else {
            return Ok(());
        };
        if record.mode != NetworkMode::Processing {
            return Ok(());
        }
        let quota = calculate_to_accept(ctx.params, prev)
            .remove
            .min(ctx.params.max_rotated_per_cycle) as usize;
        if quota == 0 {
            return Ok(());
        }
        let leaving: HashSet<&NodeId> = record
            .removed
            .iter()
            .chain(&record.apoptosized)
            .chain(&record.lost)
            .collect();
        let rotated: Vec<NodeId> = ctx
            .nodes
            .by_join_order()
            .filter(|n| n.is_active() && !leaving.contains(&n.id))
            .take(quota)
            .map(|n| n.id)
            .collect();
        if !rotated.is_empty() {
            tracing::debug!(count = rotated.len(), counter = record.counter, "rotating out oldest nodes");
        }
        record.removed.extend(rotated);
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }

    fn parse_record(&self, record: &CycleRecord) -> Change {
        Change {
            removed: record.removed.clone(),
            ..Change::default()
        }
    }
}

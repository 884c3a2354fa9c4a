//! Apoptosis: a node's signed announcement that it is leaving.
//!
//! A node that finds its own state diverged, or that is shutting down,
//! proposes its removal for a target cycle. Proposals carry their own cycle
//! so they are accepted in any quarter that still precedes the target, and
//! persist across resets until the target cycle is built.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, ApoptosisProposal, GossipPayload, SchemaError};
use shoal_types::{CycleRecord, NodeId};
use std::collections::BTreeMap;

use crate::error::ConsensusError;
use crate::nodelist::Change;
use crate::quarter::Quarter;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[FieldSpec::req("apoptosized", FieldKind::Arr)];

const ROUTES: &[&str] = &[routes::APOPTOSIZE];

#[derive(Debug, Default)]
pub struct Apoptosis {
    proposals: BTreeMap<NodeId, ApoptosisProposal>,
    queued: Vec<GossipPayload>,
}

impl Apoptosis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.proposals.len()
    }
}

impl Submodule for Apoptosis {
    fn name(&self) -> &'static str {
        "apoptosis"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, counter: u64) {
        self.proposals.retain(|_, p| p.when >= counter);
    }

    fn queue_request(&mut self, payload: GossipPayload) {
        self.queued.push(payload);
    }

    fn send_requests(&mut self) -> Vec<GossipPayload> {
        std::mem::take(&mut self.queued)
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        let GossipPayload::Apoptosize(req) = payload else {
            return GossipVerdict::rejected("unexpected route");
        };
        let proposal = &req.body;
        if self.proposals.contains_key(&proposal.id) {
            return GossipVerdict::ignored("apoptosis already proposed");
        }
        if ctx.node_signed_by(&proposal.id, req.owner()).is_none() {
            return GossipVerdict::rejected("apoptosis not signed by the node");
        }
        // the record for `counter` is built at Q3
        let too_late = match ctx.quarter {
            Some(Quarter::Q3 | Quarter::Q4) => proposal.when <= ctx.counter,
            _ => proposal.when < ctx.counter,
        };
        if too_late {
            return GossipVerdict::rejected("apoptosis for a cycle already built");
        }
        self.proposals.insert(proposal.id, proposal.clone());
        GossipVerdict::Accepted
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        txs.apoptosis = self.proposals.keys().copied().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        _prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let counter = record.counter;
        record.apoptosized = txs
            .apoptosis
            .iter()
            .filter(|id| {
                self.proposals
                    .get(id)
                    .is_some_and(|p| p.when == counter)
                    && ctx.nodes.contains(id)
            })
            .copied()
            .collect();
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }

    fn parse_record(&self, record: &CycleRecord) -> Change {
        Change {
            removed: record.apoptosized.clone(),
            ..Change::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::tests::Fixture;
    use crate::nodelist::tests::make_node;
    use shoal_crypto::{keypair_from_seed, sign_obj};
    use shoal_types::{Hash256, KeyPair, NetworkId, NetworkMode, NodeStatus};

    fn setup() -> (Fixture, KeyPair) {
        let mut fx = Fixture::new(NetworkMode::Processing, 10, 10);
        let kp = keypair_from_seed(&[2; 32]);
        let mut node = make_node(2, NodeStatus::Active, 2);
        node.info.public_key = kp.public;
        fx.nodes.add_node(node);
        (fx, kp)
    }

    fn propose(kp: &KeyPair, when: u64) -> GossipPayload {
        let body = ApoptosisProposal {
            id: Hash256::new([2; 32]),
            when,
        };
        GossipPayload::Apoptosize(sign_obj(body, kp).unwrap())
    }

    #[test]
    fn proposal_lands_in_its_target_cycle() {
        let (fx, kp) = setup();
        let counter = fx.ctx().counter;
        let mut apoptosis = Apoptosis::new();
        assert_eq!(
            apoptosis.handle_gossip(&propose(&kp, counter + 1), &fx.ctx()),
            GossipVerdict::Accepted
        );

        let mut txs = CycleTxs::default();
        apoptosis.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, counter, fx.marker, 0, 60);
        apoptosis.update_record(&txs, &mut record, None, &fx.ctx()).unwrap();
        assert!(record.apoptosized.is_empty());

        // survives the reset into its target cycle
        apoptosis.reset(counter + 1);
        assert_eq!(apoptosis.pending(), 1);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, counter + 1, fx.marker, 0, 60);
        apoptosis.update_record(&txs, &mut record, None, &fx.ctx()).unwrap();
        assert_eq!(record.apoptosized, vec![Hash256::new([2; 32])]);
        assert_eq!(apoptosis.parse_record(&record).removed.len(), 1);

        apoptosis.reset(counter + 2);
        assert_eq!(apoptosis.pending(), 0);
    }

    #[test]
    fn late_proposal_is_rejected_after_q2() {
        let (fx, kp) = setup();
        let counter = fx.ctx().counter;
        let mut apoptosis = Apoptosis::new();
        let ctx = CycleContext {
            quarter: Some(Quarter::Q3),
            ..fx.ctx()
        };
        assert!(matches!(
            apoptosis.handle_gossip(&propose(&kp, counter), &ctx),
            GossipVerdict::Rejected(_)
        ));
        assert_eq!(
            apoptosis.handle_gossip(&propose(&kp, counter), &fx.ctx()),
            GossipVerdict::Accepted
        );
    }
}

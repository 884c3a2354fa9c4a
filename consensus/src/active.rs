//! Activation of joined nodes.
//!
//! A node that has synced asks to go active with a signed `gossip-active`.
//! Under the standby strategy only Ready nodes may ask; direct admission
//! also accepts Syncing nodes, since it has no sync-finished step.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, ActiveRequest, GossipPayload, SchemaError};
use shoal_types::{CycleRecord, JoinStrategy, NodeId, NodeStatus, PublicKey, Signed};
use std::collections::BTreeMap;

use crate::error::ConsensusError;
use crate::nodelist::{Change, NodeUpdate};
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("activated", FieldKind::Arr),
    FieldSpec::req("activatedPublicKeys", FieldKind::Arr),
];

const ROUTES: &[&str] = &[routes::GOSSIP_ACTIVE];

fn may_activate(status: NodeStatus, strategy: JoinStrategy) -> bool {
    match strategy {
        JoinStrategy::V1 => matches!(status, NodeStatus::Syncing | NodeStatus::Ready),
        JoinStrategy::V2 => status == NodeStatus::Ready,
    }
}

#[derive(Debug, Default)]
pub struct Active {
    requests: BTreeMap<NodeId, Signed<ActiveRequest>>,
    queued: Vec<GossipPayload>,
}

impl Active {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Submodule for Active {
    fn name(&self) -> &'static str {
        "active"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, _counter: u64) {
        self.requests.clear();
    }

    fn queue_request(&mut self, payload: GossipPayload) {
        self.queued.push(payload);
    }

    fn send_requests(&mut self) -> Vec<GossipPayload> {
        std::mem::take(&mut self.queued)
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        let GossipPayload::Active(req) = payload else {
            return GossipVerdict::rejected("unexpected route");
        };
        let id = req.body.node_id;
        if self.requests.contains_key(&id) {
            return GossipVerdict::ignored("active request already seen");
        }
        let Some(node) = ctx.node_signed_by(&id, req.owner()) else {
            return GossipVerdict::rejected("active request not signed by the node");
        };
        if !may_activate(node.status, ctx.params.join_strategy) {
            return GossipVerdict::rejected(format!("node is {}", node.status));
        }
        if req.body.cycle_number != ctx.counter {
            return GossipVerdict::rejected("active request for another cycle");
        }
        self.requests.insert(id, req.clone());
        GossipVerdict::Accepted
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        txs.active = self.requests.keys().copied().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        _prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let cap = ctx.params.max_activated_per_cycle as usize;
        let (ids, keys): (Vec<NodeId>, Vec<PublicKey>) = txs
            .active
            .iter()
            .filter_map(|id| ctx.nodes.get(id))
            .filter(|n| may_activate(n.status, ctx.params.join_strategy))
            .take(cap)
            .map(|n| (n.id, n.info.public_key))
            .unzip();
        record.activated = ids;
        record.activated_public_keys = keys;
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }

    fn parse_record(&self, record: &CycleRecord) -> Change {
        Change {
            updated: record
                .activated
                .iter()
                .map(|id| NodeUpdate {
                    id: *id,
                    status: NodeStatus::Active,
                    active_timestamp: Some(record.start),
                })
                .collect(),
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
    use shoal_types::{Hash256, NetworkId, NetworkMode, Node};

    fn signed_node(seed: u8, status: NodeStatus) -> (Node, shoal_types::KeyPair) {
        let kp = keypair_from_seed(&[seed; 32]);
        let mut node = make_node(seed, status, seed as u64);
        node.info.public_key = kp.public;
        (node, kp)
    }

    fn request(node: &Node, kp: &shoal_types::KeyPair, cycle: u64) -> GossipPayload {
        let body = ActiveRequest {
            node_id: node.id,
            timestamp: 1,
            cycle_number: cycle,
        };
        GossipPayload::Active(sign_obj(body, kp).unwrap())
    }

    #[test]
    fn ready_node_is_activated() {
        let mut fx = Fixture::new(NetworkMode::Processing, 20, 20);
        let (node, kp) = signed_node(1, NodeStatus::Ready);
        fx.nodes.add_node(node.clone());

        let mut active = Active::new();
        let counter = fx.ctx().counter;
        assert_eq!(
            active.handle_gossip(&request(&node, &kp, counter), &fx.ctx()),
            GossipVerdict::Accepted
        );

        let mut txs = CycleTxs::default();
        active.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, counter, Hash256::ZERO, 500, 60);
        active.update_record(&txs, &mut record, None, &fx.ctx()).unwrap();
        assert_eq!(record.activated, vec![node.id]);
        assert_eq!(record.activated_public_keys, vec![kp.public]);

        let change = active.parse_record(&record);
        assert_eq!(change.updated[0].active_timestamp, Some(500));
    }

    #[test]
    fn syncing_node_needs_direct_admission() {
        let mut fx = Fixture::new(NetworkMode::Processing, 20, 20);
        let (node, kp) = signed_node(1, NodeStatus::Syncing);
        fx.nodes.add_node(node.clone());
        let counter = fx.ctx().counter;

        let mut active = Active::new();
        assert!(matches!(
            active.handle_gossip(&request(&node, &kp, counter), &fx.ctx()),
            GossipVerdict::Rejected(_)
        ));

        fx.params.join_strategy = JoinStrategy::V1;
        assert_eq!(
            active.handle_gossip(&request(&node, &kp, counter), &fx.ctx()),
            GossipVerdict::Accepted
        );
    }

    #[test]
    fn activations_are_capped() {
        let mut fx = Fixture::new(NetworkMode::Processing, 20, 20);
        fx.params.max_activated_per_cycle = 2;
        let mut active = Active::new();
        let counter = fx.ctx().counter;
        for seed in 1..=4 {
            let (node, kp) = signed_node(seed, NodeStatus::Ready);
            fx.nodes.add_node(node.clone());
            active.handle_gossip(&request(&node, &kp, counter), &fx.ctx());
        }
        let mut txs = CycleTxs::default();
        active.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, counter, Hash256::ZERO, 0, 60);
        active.update_record(&txs, &mut record, None, &fx.ctx()).unwrap();
        assert_eq!(record.activated.len(), 2);
        assert!(record.activated.windows(2).all(|w| w[0] < w[1]));
    }
}

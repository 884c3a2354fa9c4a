//! Lost node detection.
//!
//! Every active node is watched by the next `lostReportsNeeded` active nodes
//! after it on the id ring. A checker that cannot reach its target gossips a
//! signed `lost-down`; once enough checkers agree the target is recorded in
//! `lost[]`. A target that sees itself listed gossips `lost-up` during the
//! following cycle. If no refutation arrives the node is removed one cycle
//! after it was first recorded.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, GossipPayload, SchemaError};
use shoal_types::{CycleRecord, Hash256, NodeId};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConsensusError;
use crate::nodelist::NodeList;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("lost", FieldKind::Arr),
    FieldSpec::req("refuted", FieldKind::Arr),
];

const ROUTES: &[&str] = &[routes::LOST_DOWN, routes::LOST_UP];

/// The `count` active nodes that follow `key` on the ring, never `key` itself.
pub fn ring_checkers(nodes: &NodeList, key: &Hash256, count: usize) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(count);
    let mut cursor = *key;
    while out.len() < count {
        let Some(next) = nodes.ring_successor(&cursor) else {
            break;
        };
        if next.id == *key || out.contains(&next.id) {
            break;
        }
        out.push(next.id);
        cursor = next.id;
    }
    out
}

/// Active nodes `self_id` is responsible for checking.
pub fn targets_for(self_id: &NodeId, nodes: &NodeList, checkers: usize) -> Vec<NodeId> {
    nodes
        .active_ids()
        .iter()
        .filter(|id| *id != self_id)
        .filter(|id| ring_checkers(nodes, id, checkers).contains(self_id))
        .copied()
        .collect()
}

#[derive(Debug, Default)]
pub struct Lost {
    reports: BTreeMap<NodeId, BTreeSet<NodeId>>,
    ups: BTreeSet<NodeId>,
    queued: Vec<GossipPayload>,
}

impl Lost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports_for(&self, target: &NodeId) -> usize {
        self.reports.get(target).map_or(0, BTreeSet::len)
    }
}

impl Submodule for Lost {
    fn name(&self) -> &'static str {
        "lost"
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
            GossipPayload::LostDown(req) => {
                let report = &req.body;
                if report.cycle != ctx.counter {
                    return GossipVerdict::rejected("lost report for another cycle");
                }
                if self
                    .reports
                    .get(&report.target)
                    .is_some_and(|c| c.contains(&report.checker))
                {
                    return GossipVerdict::ignored("lost report already seen");
                }
                if !ctx.nodes.is_active(&report.target) {
                    return GossipVerdict::ignored("target is not active");
                }
                if ctx.node_signed_by(&report.checker, req.owner()).is_none() {
                    return GossipVerdict::rejected("lost report not signed by the checker");
                }
                let needed = ctx.params.lost_reports_needed.max(1) as usize;
                if !ring_checkers(ctx.nodes, &report.target, needed).contains(&report.checker) {
                    return GossipVerdict::rejected("reporter is not a checker of the target");
                }
                self.reports
                    .entry(report.target)
                    .or_default()
                    .insert(report.checker);
                GossipVerdict::Accepted
            }
            GossipPayload::LostUp(req) => {
                let up = &req.body;
                if up.cycle != ctx.counter {
                    return GossipVerdict::rejected("lost-up for another cycle");
                }
                if self.ups.contains(&up.target) {
                    return GossipVerdict::ignored("lost-up already seen");
                }
                if ctx.node_signed_by(&up.target, req.owner()).is_none() {
                    return GossipVerdict::rejected("lost-up not signed by the target");
                }
                self.ups.insert(up.target);
                GossipVerdict::Accepted
            }
            _ => GossipVerdict::rejected("unexpected route"),
        }
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        txs.lost = self
            .reports
            .iter()
            .map(|(target, checkers)| (*target, checkers.iter().copied().collect()))
            .collect();
        txs.lost_up = self.ups.iter().copied().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let needed = ctx.params.lost_reports_needed.max(1) as usize;
        record.lost = txs
            .lost
            .iter()
            .filter(|(target, checkers)| {
                checkers.len() >= needed && !txs.lost_up.contains(target) && ctx.nodes.contains(target)
            })
            .map(|(target, _)| *target)
            .collect();

        let Some(prev) = prev else {
            return Ok(());
        };
        let (refuted, unrefuted): (Vec<NodeId>, Vec<NodeId>) =
            prev.lost.iter().copied().partition(|id| txs.lost_up.contains(id));
        record.removed.extend(unrefuted.into_iter().filter(|id| ctx.nodes.contains(id)));
        record.refuted = refuted;
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::tests::Fixture;
    use crate::nodelist::tests::make_node;
    use shoal_crypto::{keypair_from_seed, sign_obj};
    use shoal_messages::{LostReport, LostUp};
    use shoal_types::{KeyPair, NetworkId, NetworkMode, NodeStatus};

    fn fixture_with(seeds: &[u8]) -> (Fixture, Vec<KeyPair>) {
        let mut fx = Fixture::new(NetworkMode::Processing, seeds.len() as u32, 20);
        let mut keys = Vec::new();
        for &seed in seeds {
            let kp = keypair_from_seed(&[seed; 32]);
            let mut node = make_node(seed, NodeStatus::Active, seed as u64);
            node.info.public_key = kp.public;
            fx.nodes.add_node(node);
            keys.push(kp);
        }
        (fx, keys)
    }

    fn id(b: u8) -> NodeId {
        Hash256::new([b; 32])
    }

    fn report(kp: &KeyPair, target: u8, checker: u8, cycle: u64) -> GossipPayload {
        let body = LostReport {
            target: id(target),
            checker: id(checker),
            cycle,
        };
        GossipPayload::LostDown(sign_obj(body, kp).unwrap())
    }

    #[test]
    fn checkers_follow_the_ring() {
        let (fx, _) = fixture_with(&[1, 2, 3]);
        assert_eq!(ring_checkers(&fx.nodes, &id(1), 1), vec![id(2)]);
        assert_eq!(ring_checkers(&fx.nodes, &id(3), 2), vec![id(1), id(2)]);
        assert_eq!(ring_checkers(&fx.nodes, &id(3), 5).len(), 2);
        assert_eq!(targets_for(&id(1), &fx.nodes, 1), vec![id(3)]);
    }

    #[test]
    fn reported_node_is_lost_then_removed() {
        let (fx, keys) = fixture_with(&[1, 2, 3]);
        let counter = fx.ctx().counter;
        let mut lost = Lost::new();
        assert_eq!(
            lost.handle_gossip(&report(&keys[1], 1, 2, counter), &fx.ctx()),
            GossipVerdict::Accepted
        );

        let mut txs = CycleTxs::default();
        lost.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, counter, fx.marker, 0, 60);
        lost.update_record(&txs, &mut record, Some(&fx.prev), &fx.ctx()).unwrap();
        assert_eq!(record.lost, vec![id(1)]);
        assert!(record.removed.is_empty());

        // one cycle later, no refutation
        let mut next = CycleRecord::skeleton(NetworkId::Dev, counter + 1, fx.marker, 0, 60);
        lost.reset(counter + 1);
        lost.update_record(&CycleTxs::default(), &mut next, Some(&record), &fx.ctx())
            .unwrap();
        assert_eq!(next.removed, vec![id(1)]);
    }

    #[test]
    fn refuted_node_stays() {
        let (mut fx, keys) = fixture_with(&[1, 2, 3]);
        fx.prev.lost = vec![id(1)];
        let counter = fx.ctx().counter;
        let mut lost = Lost::new();
        let up = LostUp {
            target: id(1),
            cycle: counter,
        };
        let payload = GossipPayload::LostUp(sign_obj(up, &keys[0]).unwrap());
        assert_eq!(lost.handle_gossip(&payload, &fx.ctx()), GossipVerdict::Accepted);

        let mut txs = CycleTxs::default();
        lost.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, counter, fx.marker, 0, 60);
        lost.update_record(&txs, &mut record, Some(&fx.prev), &fx.ctx()).unwrap();
        assert_eq!(record.refuted, vec![id(1)]);
        assert!(record.removed.is_empty());
    }

    #[test]
    fn only_the_assigned_checker_may_report() {
        let (fx, keys) = fixture_with(&[1, 2, 3]);
        let counter = fx.ctx().counter;
        let mut lost = Lost::new();
        // 3 checks 2, not 1
        assert!(matches!(
            lost.handle_gossip(&report(&keys[2], 1, 3, counter), &fx.ctx()),
            GossipVerdict::Rejected(_)
        ));
        // signed by someone other than the named checker
        assert!(matches!(
            lost.handle_gossip(&report(&keys[0], 1, 2, counter), &fx.ctx()),
            GossipVerdict::Rejected(_)
        ));
        assert_eq!(lost.reports_for(&id(1)), 0);
    }
}

//! Direct admission: valid requests gossiped this cycle are digested into
//! `joinedConsensors`, best selection numbers first.
//!
//! Scores are taken at Q3 against a seed folding the newest marker with every
//! candidate key of the cycle, so re-signing a request never moves its rank.

use serde_json::Value;
use shoal_crypto::selection_num;
use shoal_messages::schema::{FieldKind, FieldSpec, NODE_INFO};
use shoal_messages::{routes, GossipPayload, JoinRequest, SchemaError};
use shoal_types::{CycleRecord, JoinStrategy, PublicKey, SelectionNum, Signed};
use std::collections::BTreeMap;

use crate::error::ConsensusError;
use crate::join::{
    calculate_to_accept, cycle_seed, joined_consensor, select_top_distinct, validate_join_request,
    Admission, JoinError,
};
use crate::nodelist::Change;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[FieldSpec::req(
    "joinedConsensors",
    FieldKind::Arr,
)];

const ROUTES: &[&str] = &[routes::GOSSIP_JOIN];

#[derive(Debug, Default)]
pub struct JoinV1 {
    requests: BTreeMap<PublicKey, Signed<JoinRequest>>,
}

impl JoinV1 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    fn insert(&mut self, req: Signed<JoinRequest>) -> bool {
        let pk = req.body.node_info.public_key;
        if self.requests.contains_key(&pk) {
            return false;
        }
        self.requests.insert(pk, req);
        true
    }
}

impl Submodule for JoinV1 {
    fn name(&self) -> &'static str {
        "join"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, _counter: u64) {
        self.requests.clear();
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        let GossipPayload::Join(req) = payload else {
            return GossipVerdict::rejected("unexpected route");
        };
        if self.requests.contains_key(&req.body.node_info.public_key) {
            return GossipVerdict::ignored("join request already seen");
        }
        if let Err(e) = validate_join_request(req, ctx) {
            return GossipVerdict::rejected(e.to_string());
        }
        self.insert(req.clone());
        GossipVerdict::Accepted
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        txs.joins = self.requests.values().cloned().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let Some(prev) = prev else {
            return Ok(());
        };
        let capacity = calculate_to_accept(ctx.params, prev).add;
        let n = capacity.min(ctx.params.max_joined_per_cycle) as usize;
        let seed = cycle_seed(
            &record.previous,
            txs.joins.iter().map(|req| &req.body.node_info.public_key),
        );
        let scored: Vec<(SelectionNum, &Signed<JoinRequest>)> = txs
            .joins
            .iter()
            .map(|req| (selection_num(&seed, &req.body.node_info.public_key), req))
            .collect();
        let chosen = select_top_distinct(
            scored,
            n,
            |(num, req)| (num, &req.body.node_info.public_key),
            |(_, req)| &req.body.node_info,
            |info| {
                ctx.nodes
                    .get_by_ip_port(&info.external_ip, info.external_port)
                    .is_some()
            },
        );
        let joined = chosen
            .into_iter()
            .map(|(_, req)| joined_consensor(&req.body.node_info, req.body.timestamp, record))
            .collect();
        record.joined_consensors = joined;
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)?;
        if let Some(list) = record["joinedConsensors"].as_array() {
            for entry in list {
                validate_fields(entry, NODE_INFO)?;
            }
        }
        Ok(())
    }

    fn parse_record(&self, record: &CycleRecord) -> Change {
        Change {
            added: record.joined_consensors.iter().map(|jc| jc.to_node()).collect(),
            ..Change::default()
        }
    }
}

impl Admission for JoinV1 {
    fn strategy(&self) -> JoinStrategy {
        JoinStrategy::V1
    }

    fn as_submodule(&self) -> &dyn Submodule {
        self
    }

    fn as_submodule_mut(&mut self) -> &mut dyn Submodule {
        self
    }

    fn prevalidate(&self, req: &Signed<JoinRequest>, ctx: &CycleContext<'_>) -> Result<(), JoinError> {
        if self.requests.contains_key(&req.body.node_info.public_key) {
            return Err(JoinError::AlreadyPending);
        }
        validate_join_request(req, ctx)
    }

    fn commit(
        &mut self,
        req: Signed<JoinRequest>,
        ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError> {
        // state may have moved while the probe ran
        self.prevalidate(&req, ctx)?;
        let payload = GossipPayload::Join(req.clone());
        self.insert(req);
        Ok(payload)
    }

    fn is_waiting(&self, pk: &PublicKey) -> bool {
        self.requests.contains_key(pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::tests::{candidate, join_request, Fixture};
    use shoal_crypto::sign_obj;
    use shoal_types::{Hash256, KeyPair, NetworkId, NetworkMode};

    fn resigned(kp: &KeyPair, marker: Hash256, edit: impl FnOnce(&mut JoinRequest)) -> Signed<JoinRequest> {
        let mut body = join_request(kp, marker).body;
        edit(&mut body);
        sign_obj(body, kp).unwrap()
    }

    fn fill(join: &mut JoinV1, fx: &Fixture, n: u8) {
        for seed in 1..=n {
            let req = join_request(&candidate(seed), fx.marker);
            let verdict = join.handle_gossip(&GossipPayload::Join(req), &fx.ctx());
            assert_eq!(verdict, GossipVerdict::Accepted);
        }
    }

    fn build(join: &JoinV1, fx: &Fixture) -> CycleRecord {
        let mut txs = CycleTxs::default();
        join.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, 5, fx.marker, 60, 60);
        join.update_record(&txs, &mut record, Some(&fx.prev), &fx.ctx())
            .unwrap();
        record
    }

    #[test]
    fn joined_is_capped_by_max_joined_per_cycle() {
        let fx = Fixture::new(NetworkMode::Forming, 0, 40);
        let mut join = JoinV1::new();
        fill(&mut join, &fx, 14);
        let record = build(&join, &fx);
        assert_eq!(record.joined_consensors.len(), 10);
    }

    #[test]
    fn joined_is_capped_by_capacity() {
        let fx = Fixture::new(NetworkMode::Forming, 12, 15);
        let mut join = JoinV1::new();
        fill(&mut join, &fx, 6);
        let record = build(&join, &fx);
        assert_eq!(record.joined_consensors.len(), 3);
        for jc in &record.joined_consensors {
            assert_eq!(jc.cycle_joined, fx.marker);
        }
    }

    #[test]
    fn duplicate_gossip_is_ignored() {
        let fx = Fixture::new(NetworkMode::Forming, 0, 15);
        let mut join = JoinV1::new();
        let req = GossipPayload::Join(join_request(&candidate(1), fx.marker));
        assert_eq!(join.handle_gossip(&req, &fx.ctx()), GossipVerdict::Accepted);
        assert!(matches!(
            join.handle_gossip(&req, &fx.ctx()),
            GossipVerdict::Ignored(_)
        ));
        assert_eq!(join.pending(), 1);
    }

    #[test]
    fn commit_after_probe_is_insert_if_absent() {
        let fx = Fixture::new(NetworkMode::Forming, 0, 15);
        let mut join = JoinV1::new();
        let req = join_request(&candidate(1), fx.marker);
        join.prevalidate(&req, &fx.ctx()).unwrap();
        join.commit(req.clone(), &fx.ctx()).unwrap();
        assert_eq!(join.commit(req, &fx.ctx()), Err(JoinError::AlreadyPending));
    }

    #[test]
    fn no_joins_without_previous_record() {
        let fx = Fixture::new(NetworkMode::Forming, 0, 15);
        let mut join = JoinV1::new();
        fill(&mut join, &fx, 2);
        let mut txs = CycleTxs::default();
        join.get_txs(&mut txs);
        let mut record = CycleRecord::skeleton(NetworkId::Dev, 0, Hash256::ZERO, 0, 60);
        join.update_record(&txs, &mut record, None, &fx.ctx()).unwrap();
        assert!(record.joined_consensors.is_empty());
    }

    #[test]
    fn re_signing_a_request_does_not_move_its_rank() {
        let fx = Fixture::new(NetworkMode::Forming, 12, 15);
        let joined_with = |timestamp: u64| {
            let mut join = JoinV1::new();
            for seed in 1..=6u8 {
                let kp = candidate(seed);
                let req = if seed == 1 {
                    resigned(&kp, fx.marker, |b| b.timestamp = timestamp)
                } else {
                    join_request(&kp, fx.marker)
                };
                let verdict = join.handle_gossip(&GossipPayload::Join(req), &fx.ctx());
                assert_eq!(verdict, GossipVerdict::Accepted);
            }
            build(&join, &fx)
                .joined_consensors
                .into_iter()
                .map(|jc| jc.info.public_key)
                .collect::<Vec<_>>()
        };
        let baseline = joined_with(1_000);
        assert_eq!(baseline.len(), 3);
        for timestamp in 1_001..1_050 {
            assert_eq!(joined_with(timestamp), baseline);
        }
    }

    #[test]
    fn candidates_sharing_an_address_are_not_both_joined() {
        let fx = Fixture::new(NetworkMode::Forming, 0, 40);
        let mut join = JoinV1::new();
        for seed in 1..=4u8 {
            let req = resigned(&candidate(seed), fx.marker, |b| {
                b.node_info.external_ip = "10.9.9.9".into();
            });
            let verdict = join.handle_gossip(&GossipPayload::Join(req), &fx.ctx());
            assert_eq!(verdict, GossipVerdict::Accepted);
        }
        let record = build(&join, &fx);
        assert_eq!(record.joined_consensors.len(), 1);
    }
}

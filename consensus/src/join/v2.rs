//! Standby-list admission.
//!
//! Valid requests are gossiped as `gossip-valid-join-requests` and reach the
//! persistent standby list through `standbyAdd`. At Q2 every node ranks the
//! standby list against the newest marker and selects the same top
//! candidates. Every entry was recorded before that marker existed, so no
//! candidate can know its rank when it submits. The selection
//! becomes `joinedConsensors` in the record built at Q3. Standby entries that
//! are not refreshed for `standby_list_cycles_ttl` cycles expire, and
//! candidates may withdraw with `gossip-unjoin`.

use serde_json::Value;
use shoal_crypto::{selection_num, verify_obj, CryptoError};
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, GossipPayload, JoinRequest, SchemaError, StandbyRefresh, UnjoinRequest};
use shoal_types::{
    CycleRecord, Hash256, JoinStrategy, NodeId, NodeStatus, PublicKey, SelectionNum, Signed,
    StandbyInfo,
};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConsensusError;
use crate::join::{
    calculate_to_accept, joined_consensor, select_top_distinct, validate_join_request, Admission,
    JoinError,
};
use crate::nodelist::{list_hash, Change, NodeUpdate};
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("joinedConsensors", FieldKind::Arr),
    FieldSpec::req("standbyAdd", FieldKind::Arr),
    FieldSpec::req("standbyRemove", FieldKind::Arr),
    FieldSpec::req("standbyRefresh", FieldKind::Arr),
    FieldSpec::req("standbyNodeListHash", FieldKind::Hex(32)),
    FieldSpec::req("startedSyncing", FieldKind::Arr),
    FieldSpec::req("finishedSyncing", FieldKind::Arr),
];

const ROUTES: &[&str] = &[
    routes::GOSSIP_VALID_JOIN_REQUESTS,
    routes::GOSSIP_UNJOIN,
    routes::GOSSIP_STANDBY_REFRESH,
    routes::GOSSIP_SYNC_STARTED,
    routes::GOSSIP_SYNC_FINISHED,
];

fn standby_info(req: &Signed<JoinRequest>, counter: u64) -> StandbyInfo {
    StandbyInfo {
        node_info: req.body.node_info.clone(),
        cycle_marker: req.body.cycle_marker,
        join_request_timestamp: req.body.timestamp,
        added_counter: counter,
        last_refresh_counter: counter,
    }
}

#[derive(Debug, Default)]
pub struct JoinV2 {
    standby: BTreeMap<PublicKey, StandbyInfo>,

    // per cycle
    adds: BTreeMap<PublicKey, StandbyInfo>,
    unjoins: BTreeSet<PublicKey>,
    refreshes: BTreeSet<PublicKey>,
    sync_started: BTreeSet<NodeId>,
    sync_finished: BTreeSet<NodeId>,
    selected: Vec<StandbyInfo>,

    queued: Vec<GossipPayload>,
}

impl JoinV2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standby_len(&self) -> usize {
        self.standby.len()
    }

    pub fn selected(&self) -> &[StandbyInfo] {
        &self.selected
    }

    /// The standby list as it will be once `record` is digested.
    pub fn standby_after(&self, record: &CycleRecord) -> BTreeMap<PublicKey, StandbyInfo> {
        let mut next = self.standby.clone();
        for info in &record.standby_add {
            next.entry(info.node_info.public_key)
                .or_insert_with(|| info.clone());
        }
        for pk in &record.standby_remove {
            next.remove(pk);
        }
        for pk in &record.standby_refresh {
            if let Some(info) = next.get_mut(pk) {
                info.last_refresh_counter = record.counter;
            }
        }
        for jc in &record.joined_consensors {
            next.remove(&jc.info.public_key);
        }
        next
    }

    fn is_expired(info: &StandbyInfo, counter: u64, ttl: u64) -> bool {
        info.last_refresh_counter.saturating_add(ttl) < counter
    }

    fn accept_sync_status(
        ctx: &CycleContext<'_>,
        id: &NodeId,
        cycle: u64,
        signer: &PublicKey,
    ) -> Result<(), String> {
        let node = ctx
            .node_signed_by(id, signer)
            .ok_or_else(|| "sync status not signed by the node".to_string())?;
        if node.status != NodeStatus::Syncing {
            return Err(format!("node is {}", node.status));
        }
        if cycle != ctx.counter {
            return Err(format!("sync status for cycle {cycle}, now {}", ctx.counter));
        }
        Ok(())
    }
}

impl Submodule for JoinV2 {
    fn name(&self) -> &'static str {
        "join"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, _counter: u64) {
        self.adds.clear();
        self.unjoins.clear();
        self.refreshes.clear();
        self.sync_started.clear();
        self.sync_finished.clear();
        self.selected.clear();
    }

    fn queue_request(&mut self, payload: GossipPayload) {
        self.queued.push(payload);
    }

    fn send_requests(&mut self) -> Vec<GossipPayload> {
        std::mem::take(&mut self.queued)
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        match payload {
            GossipPayload::ValidJoinRequest(req) => {
                let pk = req.body.node_info.public_key;
                if self.is_waiting(&pk) {
                    return GossipVerdict::ignored("candidate already on standby");
                }
                if let Err(e) = validate_join_request(req, ctx) {
                    return GossipVerdict::rejected(e.to_string());
                }
                self.adds.insert(pk, standby_info(req, ctx.counter));
                GossipVerdict::Accepted
            }
            GossipPayload::Unjoin(req) => {
                let pk = req.body.public_key;
                if req.owner() != &pk {
                    return GossipVerdict::rejected("unjoin not signed by the candidate");
                }
                if !self.is_waiting(&pk) {
                    return GossipVerdict::ignored("unjoin for unknown candidate");
                }
                if !self.unjoins.insert(pk) {
                    return GossipVerdict::ignored("unjoin already seen");
                }
                GossipVerdict::Accepted
            }
            GossipPayload::StandbyRefresh(req) => {
                let pk = req.body.public_key;
                if req.owner() != &pk {
                    return GossipVerdict::rejected("refresh not signed by the candidate");
                }
                if !self.standby.contains_key(&pk) {
                    return GossipVerdict::ignored("refresh for unknown candidate");
                }
                if req.body.cycle_number != ctx.counter {
                    return GossipVerdict::rejected("refresh for another cycle");
                }
                if !self.refreshes.insert(pk) {
                    return GossipVerdict::ignored("refresh already seen");
                }
                GossipVerdict::Accepted
            }
            GossipPayload::SyncStarted(req) => {
                if let Err(e) =
                    Self::accept_sync_status(ctx, &req.body.node_id, req.body.cycle_number, req.owner())
                {
                    return GossipVerdict::Rejected(e);
                }
                if !self.sync_started.insert(req.body.node_id) {
                    return GossipVerdict::ignored("sync-started already seen");
                }
                GossipVerdict::Accepted
            }
            GossipPayload::SyncFinished(req) => {
                if let Err(e) =
                    Self::accept_sync_status(ctx, &req.body.node_id, req.body.cycle_number, req.owner())
                {
                    return GossipVerdict::Rejected(e);
                }
                if !self.sync_finished.insert(req.body.node_id) {
                    return GossipVerdict::ignored("sync-finished already seen");
                }
                GossipVerdict::Accepted
            }
            _ => GossipVerdict::rejected("unexpected route"),
        }
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        txs.standby_adds = self.adds.values().cloned().collect();
        txs.selected = self.selected.clone();
        txs.unjoins = self.unjoins.iter().copied().collect();
        txs.standby_refreshes = self.refreshes.iter().copied().collect();
        txs.sync_started = self.sync_started.iter().copied().collect();
        txs.sync_finished = self.sync_finished.iter().copied().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        _prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        let params = ctx.params;
        let unjoined: BTreeSet<&PublicKey> = txs.unjoins.iter().collect();

        let mut claimed = BTreeSet::new();
        let joined: Vec<_> = txs
            .selected
            .iter()
            .filter(|s| !unjoined.contains(s.public_key()))
            .filter(|s| ctx.nodes.get_by_pubkey(s.public_key()).is_none())
            .filter(|s| {
                let info = &s.node_info;
                ctx.nodes
                    .get_by_ip_port(&info.external_ip, info.external_port)
                    .is_none()
                    && claimed.insert(info.external_addr())
            })
            .map(|s| joined_consensor(&s.node_info, s.join_request_timestamp, record))
            .collect();
        let joined_pks: BTreeSet<PublicKey> = joined.iter().map(|jc| jc.info.public_key).collect();

        record.standby_add = txs
            .standby_adds
            .iter()
            .filter(|s| !unjoined.contains(s.public_key()))
            .filter(|s| !self.standby.contains_key(s.public_key()))
            .cloned()
            .collect();

        record.standby_remove = self
            .standby
            .values()
            .filter(|s| !joined_pks.contains(s.public_key()))
            .filter(|s| {
                unjoined.contains(s.public_key())
                    || (Self::is_expired(s, record.counter, params.standby_list_cycles_ttl)
                        && !txs.standby_refreshes.contains(s.public_key()))
            })
            .map(|s| *s.public_key())
            .collect();

        record.standby_refresh = txs
            .standby_refreshes
            .iter()
            .filter(|pk| self.standby.contains_key(*pk))
            .filter(|pk| !record.standby_remove.contains(*pk) && !joined_pks.contains(*pk))
            .copied()
            .collect();

        let syncing = |id: &&NodeId| {
            ctx.nodes
                .get(id)
                .is_some_and(|n| n.status == NodeStatus::Syncing)
        };
        record.started_syncing = txs.sync_started.iter().filter(syncing).copied().collect();
        record.finished_syncing = txs.sync_finished.iter().filter(syncing).copied().collect();

        let timed_out: Vec<NodeId> = ctx
            .nodes
            .by_id_order()
            .filter(|n| n.status == NodeStatus::Syncing)
            .filter(|n| record.counter > n.counter_joined.saturating_add(params.max_syncing_cycles))
            .filter(|n| !record.finished_syncing.contains(&n.id))
            .map(|n| n.id)
            .collect();
        if !timed_out.is_empty() {
            tracing::debug!(count = timed_out.len(), "removing nodes that never finished syncing");
        }
        record.removed.extend(timed_out);
        record.joined_consensors = joined;

        let after = self.standby_after(record);
        record.standby = after.len() as u32;
        record.standby_node_list_hash = list_hash(&after.into_values().collect::<Vec<_>>())?;
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }

    fn parse_record(&self, record: &CycleRecord) -> Change {
        Change {
            added: record.joined_consensors.iter().map(|jc| jc.to_node()).collect(),
            updated: record
                .finished_syncing
                .iter()
                .map(|id| NodeUpdate {
                    id: *id,
                    status: NodeStatus::Ready,
                    active_timestamp: None,
                })
                .collect(),
            removed: Vec::new(),
        }
    }

    fn digest(&mut self, record: &CycleRecord, _ctx: &CycleContext<'_>) -> Result<(), ConsensusError> {
        self.standby = self.standby_after(record);
        Ok(())
    }
}

impl Admission for JoinV2 {
    fn strategy(&self) -> JoinStrategy {
        JoinStrategy::V2
    }

    fn as_submodule(&self) -> &dyn Submodule {
        self
    }

    fn as_submodule_mut(&mut self) -> &mut dyn Submodule {
        self
    }

    fn prevalidate(&self, req: &Signed<JoinRequest>, ctx: &CycleContext<'_>) -> Result<(), JoinError> {
        if self.is_waiting(&req.body.node_info.public_key) {
            return Err(JoinError::AlreadyPending);
        }
        validate_join_request(req, ctx)
    }

    fn commit(
        &mut self,
        req: Signed<JoinRequest>,
        ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError> {
        self.prevalidate(&req, ctx)?;
        self.adds
            .insert(req.body.node_info.public_key, standby_info(&req, ctx.counter));
        Ok(GossipPayload::ValidJoinRequest(req))
    }

    fn unjoin(
        &mut self,
        req: Signed<UnjoinRequest>,
        _ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError> {
        if req.owner() != &req.body.public_key || verify_obj(&req).is_err() {
            return Err(JoinError::BadSignature);
        }
        if !self.is_waiting(&req.body.public_key) {
            return Err(JoinError::NotOnStandbyList);
        }
        self.unjoins.insert(req.body.public_key);
        Ok(GossipPayload::Unjoin(req))
    }

    fn standby_refresh(
        &mut self,
        req: Signed<StandbyRefresh>,
        ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError> {
        if req.owner() != &req.body.public_key || verify_obj(&req).is_err() {
            return Err(JoinError::BadSignature);
        }
        if !self.standby.contains_key(&req.body.public_key) {
            return Err(JoinError::NotOnStandbyList);
        }
        if req.body.cycle_number != ctx.counter {
            return Err(JoinError::StaleMarker);
        }
        self.refreshes.insert(req.body.public_key);
        Ok(GossipPayload::StandbyRefresh(req))
    }

    fn execute_selection(&mut self, ctx: &CycleContext<'_>) {
        let (Some(prev), Some(marker)) = (ctx.prev, ctx.prev_marker) else {
            return;
        };
        let capacity = calculate_to_accept(ctx.params, prev).add;
        let n = capacity.min(ctx.params.max_joined_per_cycle) as usize;
        let candidates: Vec<(SelectionNum, &StandbyInfo)> = self
            .standby
            .values()
            .filter(|s| !self.unjoins.contains(s.public_key()))
            .filter(|s| ctx.nodes.get_by_pubkey(s.public_key()).is_none())
            .map(|s| (selection_num(&marker, s.public_key()), s))
            .collect();
        self.selected = select_top_distinct(
            candidates,
            n,
            |(num, s)| (num, s.public_key()),
            |(_, s)| &s.node_info,
            |info| {
                ctx.nodes
                    .get_by_ip_port(&info.external_ip, info.external_port)
                    .is_some()
            },
        )
        .into_iter()
        .map(|(_, s)| s.clone())
        .collect();
        tracing::debug!(
            counter = ctx.counter,
            capacity,
            selected = self.selected.len(),
            standby = self.standby.len(),
            "standby selection"
        );
    }

    fn is_waiting(&self, pk: &PublicKey) -> bool {
        self.standby.contains_key(pk) || self.adds.contains_key(pk)
    }

    fn standby_list(&self) -> Vec<StandbyInfo> {
        self.standby.values().cloned().collect()
    }

    fn standby_hash(&self) -> Result<Hash256, CryptoError> {
        list_hash(&self.standby_list())
    }

    fn install_standby(&mut self, list: Vec<StandbyInfo>) {
        self.standby = list
            .into_iter()
            .map(|s| (*s.public_key(), s))
            .collect();
    }
}

//! The cycle creator: quarter state machine and engine state.
//!
//! The creator owns everything a node knows about the network (node list,
//! archiver list, cycle chain, submodules) and is driven from outside by
//! [`CycleCreator::tick`] with the current wall clock. It performs no I/O:
//! every effect on the outside world comes back as a [`CycleOutput`] or a
//! [`GossipOutcome`] for the runtime to carry out.
//!
//! Active nodes build and digest records themselves ([`Participation::Creator`]).
//! Nodes that are still syncing follow: at Q4 they ask the runtime to fetch
//! the network's newest record and digest it with
//! [`CycleCreator::digest_foreign`].

use serde::Serialize;
use serde_json::Value;
use shoal_crypto::{sign_obj, CryptoError};
use shoal_messages::{
    routes, AcceptedNotice, ActiveRequest, ApoptosisProposal, CycleMarkerResponse, GossipEnvelope,
    GossipPayload, JoinRequest, JoinedResponse, JoinedV2Response, LostArchiverDown, LostReport,
    LostUp, RemoveTx, ScaleDirection, ScaleRequest, StandbyRefresh, SyncFinished, SyncStarted, UnjoinRequest,
};
use shoal_network::dedup::DEFAULT_DEDUP_CAPACITY;
use shoal_network::{GossipTarget, MessageDedup, PeerAddr};
use shoal_types::{
    Archiver, CycleMarker, CycleParams, CycleRecord, Hash256, JoinStrategy, KeyPair, NetworkId, NetworkTx,
    Node, NodeId, NodeInfo, PublicKey, Signed, StandbyInfo, TxListEntry,
};
use std::collections::BTreeMap;
use std::fmt;

use crate::archivers::ArchiverList;
use crate::chain::{CycleChain, DEFAULT_RETAINED_RECORDS};
use crate::error::ConsensusError;
use crate::join::JoinError;
use crate::lost::targets_for;
use crate::lost_archivers::archivers_for;
use crate::nodelist::{list_hash, NodeList};
use crate::quarter::{position, quarter_start_ms, Position, Quarter, QuarterEvent, QuarterObservers};
use crate::record::{bootstrap_first, build_record, BuiltRecord};
use crate::service_queue::PendingTx;
use crate::submodule::{verify_payload, CycleContext, GossipVerdict, Submodule};
use crate::submodules::Submodules;

/// Whether this node builds records or copies them from the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Participation {
    Creator,
    Follower,
}

/// Work the runtime must carry out after a tick or a local submission.
#[derive(Debug)]
pub enum CycleOutput {
    /// A quarter started. Observers have already run.
    Quarter(QuarterEvent),
    /// Gossip this node originated; send to `gossipFactor` active peers.
    Originate(GossipEnvelope),
    /// A locally submitted tx awaiting its verifier.
    Verify(PendingTx),
    /// Tell a selected candidate it has been accepted.
    NotifyAccepted {
        to: PeerAddr,
        notice: Signed<AcceptedNotice>,
    },
    /// Nodes this node checks for liveness this cycle.
    ProbeNodes(Vec<Node>),
    /// Archivers this node investigates this cycle.
    ProbeArchivers(Vec<Archiver>),
    /// A record was digested and appended to the chain.
    Digested { counter: u64, marker: CycleMarker },
    /// Follower: fetch the network's record for `counter` and digest it.
    AwaitRecord { counter: u64 },
    /// The clock is whole cycles past the cycle in progress; resync.
    FellBehind { counter: u64, cycles: u64 },
    /// This node no longer matches the network and should leave.
    IntegrityViolation { counter: u64, reason: String },
    /// This node was removed from the node list.
    Removed,
}

/// Why an incoming gossip message was not applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    Malformed(String),
    OutsideWindow,
    UnknownSender,
    BadSignature,
    UnknownRoute(String),
    Ignored(String),
    Rejected(String),
}

impl DropReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Malformed(_) => "malformed",
            Self::OutsideWindow => "outside_window",
            Self::UnknownSender => "unknown_sender",
            Self::BadSignature => "bad_signature",
            Self::UnknownRoute(_) => "unknown_route",
            Self::Ignored(_) => "ignored",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(r) | Self::UnknownRoute(r) | Self::Ignored(r) | Self::Rejected(r) => {
                write!(f, "{}: {r}", self.label())
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// What became of one incoming gossip message.
#[derive(Debug)]
pub enum GossipOutcome {
    /// Applied; forward this copy.
    Forward(GossipEnvelope),
    /// Applied; this node has no id to forward under.
    Applied,
    /// Run the verifier, then [`CycleCreator::commit_verified`] and forward
    /// on success.
    Verify(PendingTx, GossipEnvelope),
    Dropped(DropReason),
}

#[derive(Clone, Copy, Debug)]
struct CurrentCycle {
    counter: u64,
    start_ms: u64,
    done: Option<Quarter>,
}

/// Everything submodules may read, kept apart from the submodules so a
/// context can be borrowed while a submodule is borrowed mutably.
struct EngineState {
    params: CycleParams,
    network_id: NetworkId,
    nodes: NodeList,
    archivers: ArchiverList,
    chain: CycleChain,
    self_id: Option<NodeId>,
    quarter: Option<Quarter>,
}

impl EngineState {
    fn ctx(&self) -> CycleContext<'_> {
        let tip = self.chain.newest();
        CycleContext {
            params: &self.params,
            network_id: self.network_id,
            nodes: &self.nodes,
            archivers: &self.archivers,
            prev: tip.map(|e| &e.record),
            prev_marker: tip.map(|e| e.marker),
            counter: self.counter(),
            quarter: self.quarter,
            self_id: self.self_id,
        }
    }

    /// Counter of the cycle in progress.
    fn counter(&self) -> u64 {
        self.chain.newest().map_or(0, |e| e.record.counter + 1)
    }

    fn duration_ms(&self) -> u64 {
        self.params.cycle_duration.saturating_mul(1000)
    }
}

pub struct CycleCreator {
    keys: KeyPair,
    state: EngineState,
    subs: Submodules,
    observers: QuarterObservers,
    dedup: MessageDedup,
    cycle: Option<CurrentCycle>,
    built: Option<BuiltRecord>,
    participation: Participation,
}

impl CycleCreator {
    pub fn new(params: CycleParams, network_id: NetworkId, keys: KeyPair) -> Self {
        Self::with_retention(params, network_id, keys, DEFAULT_RETAINED_RECORDS)
    }

    pub fn with_retention(
        params: CycleParams,
        network_id: NetworkId,
        keys: KeyPair,
        retained_records: usize,
    ) -> Self {
        let subs = Submodules::new(params.join_strategy);
        Self {
            keys,
            state: EngineState {
                params,
                network_id,
                nodes: NodeList::new(),
                archivers: ArchiverList::new(),
                chain: CycleChain::with_retention(retained_records),
                self_id: None,
                quarter: None,
            },
            subs,
            observers: QuarterObservers::new(),
            dedup: MessageDedup::new(DEFAULT_DEDUP_CAPACITY),
            cycle: None,
            built: None,
            participation: Participation::Follower,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn params(&self) -> &CycleParams {
        &self.state.params
    }

    pub fn network_id(&self) -> NetworkId {
        self.state.network_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keys.public
    }

    pub fn self_id(&self) -> Option<NodeId> {
        self.state.self_id
    }

    pub fn self_node(&self) -> Option<&Node> {
        self.state.self_id.and_then(|id| self.state.nodes.get(&id))
    }

    pub fn nodes(&self) -> &NodeList {
        &self.state.nodes
    }

    pub fn archivers(&self) -> &ArchiverList {
        &self.state.archivers
    }

    pub fn chain(&self) -> &CycleChain {
        &self.state.chain
    }

    pub fn newest(&self) -> Option<&CycleRecord> {
        self.state.chain.newest().map(|e| &e.record)
    }

    pub fn quarter(&self) -> Option<Quarter> {
        self.state.quarter
    }

    /// Counter of the cycle in progress.
    pub fn counter(&self) -> u64 {
        self.state.counter()
    }

    pub fn participation(&self) -> Participation {
        self.participation
    }

    pub fn submodules(&self) -> &Submodules {
        &self.subs
    }

    pub fn submodules_mut(&mut self) -> &mut Submodules {
        &mut self.subs
    }

    pub fn observers_mut(&mut self) -> &mut QuarterObservers {
        &mut self.observers
    }

    pub fn context(&self) -> CycleContext<'_> {
        self.state.ctx()
    }

    /// Whether gossip is accepted right now.
    pub fn accepting_gossip(&self) -> bool {
        self.state.quarter.is_some_and(Quarter::accepts_gossip)
    }

    /// Active peers gossip may be sent to.
    pub fn gossip_targets(&self) -> Vec<GossipTarget> {
        self.state
            .nodes
            .active_by_id_order()
            .filter(|n| Some(n.id) != self.state.self_id)
            .map(|n| GossipTarget {
                id: n.id,
                addr: PeerAddr::from(n),
            })
            .collect()
    }

    pub fn cycle_marker(&self) -> Option<CycleMarkerResponse> {
        self.state.chain.newest().map(|e| CycleMarkerResponse {
            current_cycle_marker: e.marker,
            counter: e.record.counter,
            start: e.record.start,
            duration: e.record.duration,
        })
    }

    pub fn joined(&self, pk: &PublicKey) -> JoinedResponse {
        JoinedResponse {
            node: self.state.nodes.get_by_pubkey(pk).cloned(),
        }
    }

    pub fn joined_v2(&self, pk: &PublicKey) -> JoinedV2Response {
        JoinedV2Response {
            id: self.state.nodes.get_by_pubkey(pk).map(|n| n.id),
            is_on_standby_list: self.subs.join.is_waiting(pk),
        }
    }

    pub fn standby_list(&self) -> Vec<StandbyInfo> {
        self.subs.join.standby_list()
    }

    pub fn tx_list(&self) -> &[TxListEntry] {
        self.subs.service_queue.tx_list()
    }

    fn sign<T: Serialize>(&self, body: T) -> Result<Signed<T>, CryptoError> {
        sign_obj(body, &self.keys)
    }

    // ── Starting points ─────────────────────────────────────────────────

    /// Create record 0 of a new network with this node as its only member.
    pub fn bootstrap_first(
        &mut self,
        info: NodeInfo,
        join_request_timestamp: u64,
        archivers: Vec<Archiver>,
        start: u64,
    ) -> Result<CycleMarker, ConsensusError> {
        if info.public_key != self.keys.public {
            return Err(ConsensusError::Other(
                "node info is not for this node's key".into(),
            ));
        }
        if !self.state.chain.is_empty() {
            return Err(ConsensusError::Other("chain already started".into()));
        }
        let built = bootstrap_first(
            &self.state.params,
            self.state.network_id,
            &self.subs,
            &info,
            join_request_timestamp,
            archivers,
            start,
        )?;
        self.digest(built.record)
    }

    /// Replace all state with a snapshot fetched from the network. `records`
    /// run oldest to newest; the lists must hash to the newest record's
    /// fields.
    pub fn install_snapshot(
        &mut self,
        records: Vec<CycleRecord>,
        nodes: Vec<Node>,
        archivers: Vec<Archiver>,
        standby: Vec<StandbyInfo>,
        mut tx_list: Vec<TxListEntry>,
    ) -> Result<(), ConsensusError> {
        let newest = records.last().ok_or(ConsensusError::EmptyChain)?.clone();

        let nodes = NodeList::from_nodes(nodes);
        if nodes.hash()? != newest.node_list_hash {
            return Err(ConsensusError::NodeListHashMismatch(newest.counter));
        }
        let archivers = ArchiverList::from_archivers(archivers);
        if archivers.hash()? != newest.archiver_list_hash {
            return Err(ConsensusError::ArchiverListHashMismatch(newest.counter));
        }
        tx_list.sort_by_key(|e| e.order_key());
        if list_hash(&tx_list)? != newest.txlisthash {
            return Err(ConsensusError::TxListHashMismatch(newest.counter));
        }
        // the standby list is keyed and hashed in public-key order
        let standby: Vec<StandbyInfo> = standby
            .into_iter()
            .map(|s| (*s.public_key(), s))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();
        if self.subs.join.strategy() == JoinStrategy::V2
            && list_hash(&standby)? != newest.standby_node_list_hash
        {
            return Err(ConsensusError::StandbyListHashMismatch(newest.counter));
        }

        let mut chain = CycleChain::with_retention(records.len().max(DEFAULT_RETAINED_RECORDS));
        for record in records {
            chain.append(record)?;
        }

        self.state.nodes = nodes;
        self.state.archivers = archivers;
        self.state.chain = chain;
        self.subs.join.install_standby(standby);
        self.subs.service_queue.install_tx_list(tx_list);
        self.subs.reset(self.state.counter());
        self.cycle = None;
        self.built = None;
        self.state.quarter = None;
        self.init_submodules();
        self.refresh_membership();
        tracing::info!(
            counter = newest.counter,
            nodes = self.state.nodes.len(),
            participation = ?self.participation,
            "installed network snapshot"
        );
        Ok(())
    }

    fn init_submodules(&mut self) {
        let ctx = self.state.ctx();
        for sub in self.subs.all_mut() {
            sub.init(&ctx);
        }
    }

    /// Re-derive this node's id and role. Returns whether it was a member
    /// before and is not any more.
    fn refresh_membership(&mut self) -> bool {
        let was_member = self.state.self_id.is_some();
        self.state.self_id = self
            .state
            .nodes
            .get_by_pubkey(&self.keys.public)
            .map(|n| n.id);
        let active = self
            .state
            .self_id
            .is_some_and(|id| self.state.nodes.is_active(&id));
        let role = if active {
            Participation::Creator
        } else {
            Participation::Follower
        };
        if role != self.participation {
            tracing::info!(from = ?self.participation, to = ?role, "participation changed");
            self.participation = role;
        }
        was_member && self.state.self_id.is_none()
    }

    // ── Quarter state machine ───────────────────────────────────────────

    /// Advance the state machine to `now_ms`, running every quarter start
    /// that has passed since the last tick.
    pub fn tick(&mut self, now_ms: u64) -> Vec<CycleOutput> {
        let mut out = Vec::new();
        // finishing one cycle can leave the next one already under way
        for _ in 0..2 {
            let Some(tip) = self.state.chain.newest() else {
                break;
            };
            let tip_counter = tip.record.counter;
            let counter = tip_counter + 1;
            let start_ms = tip.record.end_ms();
            let reached = match position(now_ms, start_ms, self.state.duration_ms()) {
                Position::Before => break,
                Position::Within(q) => q,
                Position::After { cycles: 0 } => Quarter::Q4,
                Position::After { cycles } => {
                    tracing::warn!(counter, cycles, "clock is past the cycle in progress");
                    out.push(CycleOutput::FellBehind { counter, cycles });
                    break;
                }
            };
            if self.cycle.map(|c| c.counter) != Some(counter) {
                self.cycle = Some(CurrentCycle {
                    counter,
                    start_ms,
                    done: None,
                });
                self.state.quarter = None;
            }
            while let Some(next) = self.next_quarter(reached) {
                self.run_quarter(next, &mut out);
            }
            if self.state.chain.newest().map(|e| e.record.counter) == Some(tip_counter) {
                break;
            }
        }
        out
    }

    fn next_quarter(&self, reached: Quarter) -> Option<Quarter> {
        let next = match self.cycle?.done {
            None => Quarter::Q1,
            Some(q) => q.next()?,
        };
        (next <= reached).then_some(next)
    }

    fn run_quarter(&mut self, quarter: Quarter, out: &mut Vec<CycleOutput>) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        cycle.done = Some(quarter);
        let cycle = *cycle;
        self.state.quarter = Some(quarter);

        if quarter == Quarter::Q1 {
            self.subs.reset(cycle.counter);
        }
        let event = QuarterEvent {
            quarter,
            counter: cycle.counter,
            start_ms: quarter_start_ms(cycle.start_ms, self.state.duration_ms(), quarter),
        };
        self.observers.emit(&event);
        out.push(CycleOutput::Quarter(event));
        tracing::debug!(counter = cycle.counter, %quarter, "quarter start");

        match quarter {
            Quarter::Q1 => self.start_q1(out),
            Quarter::Q2 => {
                let ctx = self.state.ctx();
                self.subs.join.execute_selection(&ctx);
            }
            Quarter::Q3 => self.start_q3(cycle),
            Quarter::Q4 => self.start_q4(cycle, out),
        }
    }

    fn start_q1(&mut self, out: &mut Vec<CycleOutput>) {
        let counter = self.state.counter();
        if let Some(id) = self.state.self_id {
            let listed_lost = self.newest().is_some_and(|r| r.lost.contains(&id));
            if listed_lost {
                tracing::warn!(counter, "listed as lost, refuting");
                match self.sign(LostUp { target: id, cycle: counter }) {
                    Ok(up) => self.subs.lost.queue_request(GossipPayload::LostUp(up)),
                    Err(e) => tracing::error!(error = %e, "failed to sign lost-up"),
                }
            }
        }

        let mut payloads = Vec::new();
        for sub in self.subs.all_mut() {
            payloads.extend(sub.send_requests());
        }
        for payload in payloads {
            match self.originate(payload) {
                Ok(more) => out.extend(more),
                Err(e) => tracing::warn!(error = %e, "could not originate queued gossip"),
            }
        }

        if self.participation != Participation::Creator {
            return;
        }
        let Some(self_id) = self.state.self_id else {
            return;
        };
        self.notify_accepted(self_id, out);

        let checkers = self.state.params.lost_reports_needed.max(1) as usize;
        let targets: Vec<Node> = targets_for(&self_id, &self.state.nodes, checkers)
            .iter()
            .filter_map(|id| self.state.nodes.get(id).cloned())
            .collect();
        if !targets.is_empty() {
            out.push(CycleOutput::ProbeNodes(targets));
        }
        let archivers: Vec<Archiver> =
            archivers_for(&self_id, &self.state.nodes, &self.state.archivers)
                .iter()
                .filter_map(|pk| self.state.archivers.get(pk).cloned())
                .collect();
        if !archivers.is_empty() {
            out.push(CycleOutput::ProbeArchivers(archivers));
        }
    }

    /// Candidates joined by the newest record are told by the active node
    /// that follows them on the ring.
    fn notify_accepted(&self, self_id: NodeId, out: &mut Vec<CycleOutput>) {
        let Some(tip) = self.state.chain.newest() else {
            return;
        };
        for jc in &tip.record.joined_consensors {
            let notifier = self.state.nodes.ring_successor(&jc.id).map(|n| n.id);
            if notifier != Some(self_id) || jc.info.public_key == self.keys.public {
                continue;
            }
            let notice = AcceptedNotice {
                public_key: jc.info.public_key,
                cycle_marker: tip.marker,
                counter: tip.record.counter,
            };
            match self.sign(notice) {
                Ok(notice) => out.push(CycleOutput::NotifyAccepted {
                    to: PeerAddr::from(&jc.info),
                    notice,
                }),
                Err(e) => tracing::error!(error = %e, "failed to sign accepted notice"),
            }
        }
    }

    fn start_q3(&mut self, cycle: CurrentCycle) {
        if self.participation != Participation::Creator {
            return;
        }
        let ctx = self.state.ctx();
        match build_record(&self.subs, &ctx, cycle.start_ms / 1000) {
            Ok(built) => {
                if !built.failed.is_empty() {
                    tracing::warn!(counter = cycle.counter, failed = ?built.failed, "record built with failed submodules");
                }
                self.built = Some(built);
            }
            Err(e) => tracing::error!(counter = cycle.counter, error = %e, "failed to build cycle record"),
        }
    }

    fn start_q4(&mut self, cycle: CurrentCycle, out: &mut Vec<CycleOutput>) {
        if self.participation == Participation::Follower {
            out.push(CycleOutput::AwaitRecord {
                counter: cycle.counter,
            });
            return;
        }
        let Some(built) = self.built.take() else {
            return;
        };
        let was_member = self.state.self_id.is_some();
        match self.digest(built.record) {
            Ok(marker) => {
                out.push(CycleOutput::Digested {
                    counter: cycle.counter,
                    marker,
                });
                if was_member && self.state.self_id.is_none() {
                    out.push(CycleOutput::Removed);
                }
            }
            Err(e) => self.digest_failed(cycle.counter, e, out),
        }
    }

    fn digest_failed(&self, counter: u64, e: ConsensusError, out: &mut Vec<CycleOutput>) {
        if e.is_integrity_violation() {
            tracing::error!(counter, error = %e, "cycle chain integrity violated");
            out.push(CycleOutput::IntegrityViolation {
                counter,
                reason: e.to_string(),
            });
        } else {
            tracing::error!(counter, error = %e, "failed to digest cycle record");
        }
    }

    // ── Digest ──────────────────────────────────────────────────────────

    /// Fold a finalized record into the engine. Every check runs before any
    /// state changes.
    fn digest(&mut self, record: CycleRecord) -> Result<CycleMarker, ConsensusError> {
        self.state.chain.validate_append(&record)?;

        let mut nodes = self.state.nodes.clone();
        nodes.apply(&self.subs.parse(&record));
        if nodes.hash()? != record.node_list_hash {
            return Err(ConsensusError::NodeListHashMismatch(record.counter));
        }
        let archivers = self
            .state
            .archivers
            .with_changes(&record.joined_archivers, &record.removed_archivers);
        if archivers.hash()? != record.archiver_list_hash {
            return Err(ConsensusError::ArchiverListHashMismatch(record.counter));
        }

        let ctx = self.state.ctx();
        for sub in self.subs.all_mut() {
            sub.digest(&record, &ctx)?;
        }

        let first = self.state.chain.is_empty();
        let counter = record.counter;
        self.state.nodes = nodes;
        self.state.archivers = archivers;
        let marker = self.state.chain.append(record)?;
        if first {
            self.init_submodules();
        }
        self.refresh_membership();
        tracing::info!(
            counter,
            marker = %marker,
            active = self.state.nodes.active_count(),
            total = self.state.nodes.len(),
            "digested cycle"
        );
        Ok(marker)
    }

    /// Digest a record fetched from the network (follower mode).
    pub fn digest_foreign(&mut self, record: CycleRecord) -> Vec<CycleOutput> {
        let counter = record.counter;
        let was_member = self.state.self_id.is_some();
        let mut out = Vec::new();
        match self.digest(record) {
            Ok(marker) => {
                out.push(CycleOutput::Digested { counter, marker });
                if was_member && self.state.self_id.is_none() {
                    out.push(CycleOutput::Removed);
                }
            }
            Err(e) => self.digest_failed(counter, e, &mut out),
        }
        out
    }

    /// Schema-check a raw record against every submodule before decoding it.
    pub fn decode_record(&self, value: &Value) -> Result<CycleRecord, ConsensusError> {
        self.subs.validate_record_types(value)?;
        serde_json::from_value(value.clone()).map_err(|e| ConsensusError::Other(e.to_string()))
    }

    // ── Gossip ──────────────────────────────────────────────────────────

    /// Handle one gossip message from a peer.
    ///
    /// A payload is marked seen only once it passes the window and sender
    /// checks, so an early copy does not shadow the on-time ones.
    pub fn handle_gossip(&mut self, envelope: GossipEnvelope) -> GossipOutcome {
        let hash = match MessageDedup::hash_payload(&envelope.payload) {
            Ok(h) => h,
            Err(e) => return GossipOutcome::Dropped(DropReason::Malformed(e.to_string())),
        };
        let payload = match envelope.decode() {
            Ok(p) => p,
            Err(e) => return GossipOutcome::Dropped(DropReason::Malformed(e.to_string())),
        };
        if payload.target_cycle().is_none() && !self.accepting_gossip() {
            return GossipOutcome::Dropped(DropReason::OutsideWindow);
        }
        // archivers are not in the node list and post their own refutations
        if envelope.route != routes::LOST_ARCHIVER_UP && !self.state.nodes.contains(&envelope.sender)
        {
            return GossipOutcome::Dropped(DropReason::UnknownSender);
        }
        if !self.dedup.insert_if_absent(hash) {
            return GossipOutcome::Dropped(DropReason::Duplicate);
        }
        if verify_payload(&payload).is_err() {
            return GossipOutcome::Dropped(DropReason::BadSignature);
        }

        let ctx = self.state.ctx();
        let Some(sub) = self.subs.for_route_mut(payload.route()) else {
            return GossipOutcome::Dropped(DropReason::UnknownRoute(envelope.route));
        };
        let verdict = sub.handle_gossip(&payload, &ctx);
        let forwarded = self.state.self_id.map(|id| envelope.forwarded_by(id));
        match verdict {
            GossipVerdict::Accepted => forwarded.map_or(GossipOutcome::Applied, GossipOutcome::Forward),
            GossipVerdict::Ignored(r) => GossipOutcome::Dropped(DropReason::Ignored(r)),
            GossipVerdict::Rejected(r) => GossipOutcome::Dropped(DropReason::Rejected(r)),
            GossipVerdict::NeedsVerification => match self.subs.service_queue.take_pending(&payload) {
                Some(pending) => GossipOutcome::Verify(pending, forwarded.unwrap_or(envelope)),
                None => GossipOutcome::Dropped(DropReason::Rejected("no pending verification".into())),
            },
        }
    }

    /// Apply a verifier outcome. Returns whether the tx was admitted and its
    /// gossip should be forwarded.
    pub fn commit_verified(&mut self, pending: &PendingTx, ok: bool) -> bool {
        let admitted = self.subs.service_queue.commit_verified(pending, ok);
        if !ok {
            tracing::debug!(hash = %pending.hash(), "tx failed verification");
        }
        admitted
    }

    /// Envelope for a payload this node originates; marks it seen.
    fn envelope_for(&mut self, payload: &GossipPayload) -> Result<GossipEnvelope, ConsensusError> {
        let self_id = self
            .state
            .self_id
            .ok_or_else(|| ConsensusError::Other("not in the node list".into()))?;
        let value = payload.to_value()?;
        let hash = MessageDedup::hash_payload(&value)?;
        self.dedup.insert_if_absent(hash);
        Ok(GossipEnvelope {
            route: payload.route().to_string(),
            payload: value,
            tracker: hash.to_hex(),
            sender: self_id,
            origin: self_id,
        })
    }

    /// Apply a payload locally and wrap it for gossip.
    fn originate(&mut self, payload: GossipPayload) -> Result<Vec<CycleOutput>, ConsensusError> {
        let envelope = self.envelope_for(&payload)?;
        let mut out = Vec::new();
        let ctx = self.state.ctx();
        if let Some(sub) = self.subs.for_route_mut(payload.route()) {
            match sub.handle_gossip(&payload, &ctx) {
                GossipVerdict::Accepted => {}
                GossipVerdict::NeedsVerification => {
                    if let Some(pending) = self.subs.service_queue.take_pending(&payload) {
                        out.push(CycleOutput::Verify(pending));
                    }
                }
                GossipVerdict::Ignored(r) | GossipVerdict::Rejected(r) => {
                    tracing::debug!(route = payload.route(), reason = %r, "own payload not applied locally");
                }
            }
        }
        out.push(CycleOutput::Originate(envelope));
        Ok(out)
    }

    /// Send `payload` now if gossip is open, otherwise queue it for the next Q1.
    pub fn submit(&mut self, payload: GossipPayload) -> Result<Vec<CycleOutput>, ConsensusError> {
        if self.accepting_gossip() || payload.target_cycle().is_some() {
            return self.originate(payload);
        }
        if let Some(sub) = self.subs.for_route_mut(payload.route()) {
            sub.queue_request(payload);
        }
        Ok(Vec::new())
    }

    /// Cycle a payload built now goes out in. Outside Q1-Q2 it is queued
    /// for the next cycle's Q1.
    fn gossip_counter(&self) -> u64 {
        let counter = self.counter();
        match self.state.quarter {
            Some(q) if !q.accepts_gossip() => counter + 1,
            _ => counter,
        }
    }

    fn require_self_id(&self) -> Result<NodeId, ConsensusError> {
        self.state
            .self_id
            .ok_or_else(|| ConsensusError::Other("not in the node list".into()))
    }

    // ── Payloads this node originates ───────────────────────────────────

    pub fn announce_sync_started(&mut self) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = SyncStarted {
            node_id: self.require_self_id()?,
            cycle_number: self.gossip_counter(),
        };
        let payload = GossipPayload::SyncStarted(self.sign(body)?);
        self.submit(payload)
    }

    pub fn announce_sync_finished(&mut self) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = SyncFinished {
            node_id: self.require_self_id()?,
            cycle_number: self.gossip_counter(),
        };
        let payload = GossipPayload::SyncFinished(self.sign(body)?);
        self.submit(payload)
    }

    pub fn request_active(&mut self, timestamp: u64) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = ActiveRequest {
            node_id: self.require_self_id()?,
            timestamp,
            cycle_number: self.gossip_counter(),
        };
        let payload = GossipPayload::Active(self.sign(body)?);
        self.submit(payload)
    }

    pub fn vote_scale(
        &mut self,
        scale: ScaleDirection,
        timestamp: u64,
    ) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = ScaleRequest {
            node_id: self.require_self_id()?,
            timestamp,
            counter: self.gossip_counter(),
            scale,
        };
        let payload = GossipPayload::Scaling(self.sign(body)?);
        self.submit(payload)
    }

    pub fn add_tx(&mut self, mut tx: NetworkTx) -> Result<Vec<CycleOutput>, ConsensusError> {
        tx.cycle = self.gossip_counter();
        let payload = GossipPayload::AddTx(self.sign(tx)?);
        self.submit(payload)
    }

    pub fn remove_tx(&mut self, tx_hash: Hash256) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = RemoveTx {
            tx_hash,
            cycle: self.gossip_counter(),
        };
        let payload = GossipPayload::RemoveTx(self.sign(body)?);
        self.submit(payload)
    }

    /// Report a node this node checks as unreachable.
    pub fn report_lost(&mut self, target: NodeId) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = LostReport {
            target,
            checker: self.require_self_id()?,
            cycle: self.gossip_counter(),
        };
        let payload = GossipPayload::LostDown(self.sign(body)?);
        self.submit(payload)
    }

    pub fn report_lost_archiver(&mut self, archiver: PublicKey) -> Result<Vec<CycleOutput>, ConsensusError> {
        let body = LostArchiverDown {
            archiver,
            investigator: self.require_self_id()?,
            cycle: self.gossip_counter(),
        };
        let payload = GossipPayload::LostArchiverDown(self.sign(body)?);
        self.submit(payload)
    }

    /// Announce this node's own removal in the earliest cycle that can still
    /// include it.
    pub fn propose_apoptosis(&mut self) -> Result<Vec<CycleOutput>, ConsensusError> {
        let counter = self.counter();
        let when = if self.accepting_gossip() { counter } else { counter + 1 };
        let body = ApoptosisProposal {
            id: self.require_self_id()?,
            when,
        };
        tracing::warn!(when, "proposing apoptosis");
        let payload = GossipPayload::Apoptosize(self.sign(body)?);
        self.submit(payload)
    }

    // ── Join routes ─────────────────────────────────────────────────────

    fn join_window(&self) -> Result<(), JoinError> {
        if self.accepting_gossip() {
            Ok(())
        } else {
            Err(JoinError::NotAccepting("outside the Q1-Q2 join window".into()))
        }
    }

    /// `POST /join`, first step: checks that need no I/O.
    pub fn prevalidate_join(&self, req: &Signed<JoinRequest>) -> Result<(), JoinError> {
        self.join_window()?;
        self.subs.join.prevalidate(req, &self.state.ctx())
    }

    /// `POST /join`, last step after the reachability probe.
    pub fn commit_join(&mut self, req: Signed<JoinRequest>) -> Result<Vec<CycleOutput>, JoinError> {
        self.join_window()?;
        let ctx = self.state.ctx();
        let payload = self.subs.join.commit(req, &ctx)?;
        Ok(self.wrap_committed(payload))
    }

    pub fn unjoin(&mut self, req: Signed<UnjoinRequest>) -> Result<Vec<CycleOutput>, JoinError> {
        self.join_window()?;
        let ctx = self.state.ctx();
        let payload = self.subs.join.unjoin(req, &ctx)?;
        Ok(self.wrap_committed(payload))
    }

    pub fn standby_refresh(&mut self, req: Signed<StandbyRefresh>) -> Result<Vec<CycleOutput>, JoinError> {
        self.join_window()?;
        let ctx = self.state.ctx();
        let payload = self.subs.join.standby_refresh(req, &ctx)?;
        Ok(self.wrap_committed(payload))
    }

    /// Standby count reported to join candidates; absent under direct
    /// admission.
    pub fn num_standby(&self) -> Option<u32> {
        (self.subs.join.strategy() == JoinStrategy::V2)
            .then(|| self.subs.join.standby_list().len() as u32)
    }

    fn wrap_committed(&mut self, payload: GossipPayload) -> Vec<CycleOutput> {
        match self.envelope_for(&payload) {
            Ok(env) => vec![CycleOutput::Originate(env)],
            Err(e) => {
                tracing::warn!(error = %e, route = payload.route(), "committed payload not gossiped");
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for CycleCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleCreator")
            .field("counter", &self.state.counter())
            .field("quarter", &self.state.quarter)
            .field("self_id", &self.state.self_id)
            .field("participation", &self.participation)
            .field("nodes", &self.state.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::tests::join_request;
    use shoal_crypto::keypair_from_seed;
    use shoal_types::NodeStatus;
    use std::sync::{Arc, Mutex};

    const START: u64 = 1_000;

    fn params() -> CycleParams {
        CycleParams {
            cycle_duration: 60,
            ..CycleParams::default()
        }
    }

    fn seed_creator(seed: u8) -> CycleCreator {
        let kp = keypair_from_seed(&[seed; 32]);
        let info = join_request(&kp, Hash256::ZERO).body.node_info;
        let mut creator = CycleCreator::new(params(), NetworkId::Dev, kp);
        creator.bootstrap_first(info, 1, Vec::new(), START).unwrap();
        creator
    }

    /// Millisecond inside quarter `q` of cycle `counter`.
    fn at(counter: u64, q: u64) -> u64 {
        (START + 60 * counter) * 1000 + (q - 1) * 15_000 + 1
    }

    #[test]
    fn first_node_is_active_creator() {
        let creator = seed_creator(1);
        assert_eq!(creator.counter(), 1);
        assert_eq!(creator.participation(), Participation::Creator);
        assert_eq!(creator.self_node().unwrap().status, NodeStatus::Active);
        assert_eq!(creator.cycle_marker().unwrap().counter, 0);
    }

    #[test]
    fn quarters_run_in_order_and_digest_at_q4() {
        let mut creator = seed_creator(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        creator
            .observers_mut()
            .subscribe(Box::new(move |e: &QuarterEvent| sink.lock().unwrap().push(e.quarter)));

        assert!(creator.tick(at(1, 1) - 10).is_empty());
        creator.tick(at(1, 1));
        assert!(creator.accepting_gossip());
        creator.tick(at(1, 3));
        assert!(!creator.accepting_gossip());
        let out = creator.tick(at(1, 4));
        assert!(out
            .iter()
            .any(|o| matches!(o, CycleOutput::Digested { counter: 1, .. })));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4]
        );
        assert_eq!(creator.chain().len(), 2);
        assert_eq!(creator.newest().unwrap().previous, creator.chain().get(0).unwrap().marker);
    }

    #[test]
    fn late_tick_catches_up_one_cycle() {
        let mut creator = seed_creator(1);
        let out = creator.tick(at(2, 2));
        let digested: Vec<u64> = out
            .iter()
            .filter_map(|o| match o {
                CycleOutput::Digested { counter, .. } => Some(*counter),
                _ => None,
            })
            .collect();
        assert_eq!(digested, vec![1]);
        assert_eq!(creator.quarter(), Some(Quarter::Q2));
        assert_eq!(creator.counter(), 2);
    }

    #[test]
    fn far_behind_reports_and_stops() {
        let mut creator = seed_creator(1);
        let out = creator.tick(at(5, 1));
        assert!(matches!(
            out.as_slice(),
            [CycleOutput::FellBehind { counter: 1, cycles: 3 }]
        ));
        assert_eq!(creator.chain().len(), 1);
    }

    #[test]
    fn duplicate_and_out_of_window_gossip_is_dropped() {
        let mut creator = seed_creator(1);
        creator.tick(at(1, 1));
        let outputs = creator.vote_scale(ScaleDirection::Up, 5).unwrap();
        let Some(CycleOutput::Originate(env)) = outputs.last() else {
            panic!("expected originated gossip");
        };
        // our own payload comes back
        assert!(matches!(
            creator.handle_gossip(env.clone()),
            GossipOutcome::Dropped(DropReason::Duplicate)
        ));

        let other = keypair_from_seed(&[2; 32]);
        let body = ScaleRequest {
            node_id: Hash256::new([2; 32]),
            timestamp: 1,
            counter: 1,
            scale: ScaleDirection::Up,
        };
        let payload = GossipPayload::Scaling(sign_obj(body, &other).unwrap());
        let stranger = GossipEnvelope::originate(&payload, "t".into(), Hash256::new([2; 32])).unwrap();
        assert!(matches!(
            creator.handle_gossip(stranger.clone()),
            GossipOutcome::Dropped(DropReason::UnknownSender)
        ));

        creator.tick(at(1, 3));
        let mut late = stranger;
        late.tracker = "another".into();
        late.payload["timestamp"] = serde_json::json!(2);
        assert!(matches!(
            creator.handle_gossip(late),
            GossipOutcome::Dropped(DropReason::OutsideWindow)
        ));
    }

    #[test]
    fn payloads_built_after_the_window_go_out_next_cycle() {
        let mut creator = seed_creator(1);
        creator.tick(at(1, 3));
        assert!(creator.vote_scale(ScaleDirection::Up, 5).unwrap().is_empty());

        let out = creator.tick(at(2, 1));
        let vote = out
            .iter()
            .find_map(|o| match o {
                CycleOutput::Originate(env) if env.route == routes::SCALING => Some(env),
                _ => None,
            })
            .expect("queued vote is sent at Q1");
        assert_eq!(vote.payload["counter"], 2);
    }

    #[test]
    fn follower_digests_the_creators_records() {
        let mut leader = seed_creator(1);
        leader.tick(at(1, 4));

        let (records, genesis_nodes) = genesis_snapshot(&leader);
        let mut follower = CycleCreator::new(params(), NetworkId::Dev, keypair_from_seed(&[9; 32]));
        follower
            .install_snapshot(records, genesis_nodes, Vec::new(), Vec::new(), Vec::new())
            .unwrap();
        assert_eq!(follower.participation(), Participation::Follower);

        let out = follower.tick(at(1, 4));
        assert!(out
            .iter()
            .any(|o| matches!(o, CycleOutput::AwaitRecord { counter: 1 })));
        let record = leader.newest().unwrap().clone();
        let out = follower.digest_foreign(record);
        assert!(matches!(out.as_slice(), [CycleOutput::Digested { counter: 1, .. }]));
        assert_eq!(
            follower.chain().newest().unwrap().marker,
            leader.chain().newest().unwrap().marker
        );
    }

    #[test]
    fn tampered_record_is_an_integrity_violation() {
        let mut leader = seed_creator(1);
        leader.tick(at(1, 4));
        let mut record = leader.newest().unwrap().clone();

        let mut other = seed_creator(1);
        record.node_list_hash = Hash256::new([7; 32]);
        let out = other.digest_foreign(record);
        assert!(matches!(
            out.as_slice(),
            [CycleOutput::IntegrityViolation { counter: 1, .. }]
        ));
        assert_eq!(other.chain().len(), 1);
    }

    #[test]
    fn joins_outside_the_window_are_refused() {
        let mut creator = seed_creator(1);
        creator.tick(at(1, 3));
        let candidate = keypair_from_seed(&[5; 32]);
        let marker = creator.cycle_marker().unwrap().current_cycle_marker;
        let req = join_request(&candidate, marker);
        assert!(matches!(
            creator.prevalidate_join(&req),
            Err(JoinError::NotAccepting(_))
        ));
    }

    #[test]
    fn join_then_selection_reaches_the_node_list() {
        let mut creator = seed_creator(1);
        creator.tick(at(1, 1));
        let candidate = keypair_from_seed(&[5; 32]);
        let marker = creator.cycle_marker().unwrap().current_cycle_marker;
        let req = join_request(&candidate, marker);
        creator.prevalidate_join(&req).unwrap();
        let out = creator.commit_join(req).unwrap();
        assert!(matches!(out.as_slice(), [CycleOutput::Originate(_)]));

        // cycle 1 puts the candidate on standby, cycle 2 selects it
        creator.tick(at(1, 4));
        assert!(creator.joined_v2(&candidate.public).is_on_standby_list);
        creator.tick(at(2, 4));
        let joined = creator.joined(&candidate.public);
        assert_eq!(joined.node.unwrap().status, NodeStatus::Syncing);
    }

    fn genesis_snapshot(leader: &CycleCreator) -> (Vec<CycleRecord>, Vec<Node>) {
        let records = leader.chain().range(0, 0);
        let mut nodes = NodeList::new();
        nodes.apply(&leader.submodules().parse(&records[0]));
        (records, nodes.by_id_order().cloned().collect())
    }

    #[test]
    fn snapshot_with_a_foreign_standby_list_is_refused() {
        let leader = seed_creator(1);
        let (records, nodes) = genesis_snapshot(&leader);
        let stranger = keypair_from_seed(&[8; 32]);
        let injected = StandbyInfo {
            node_info: join_request(&stranger, Hash256::ZERO).body.node_info,
            cycle_marker: Hash256::ZERO,
            join_request_timestamp: 1,
            added_counter: 0,
            last_refresh_counter: 0,
        };

        let mut follower = CycleCreator::new(params(), NetworkId::Dev, keypair_from_seed(&[9; 32]));
        let err = follower
            .install_snapshot(records.clone(), nodes.clone(), Vec::new(), vec![injected], Vec::new())
            .unwrap_err();
        assert!(matches!(err, ConsensusError::StandbyListHashMismatch(0)));
        assert!(err.is_integrity_violation());
        assert!(follower.chain().is_empty());

        follower
            .install_snapshot(records, nodes, Vec::new(), Vec::new(), Vec::new())
            .unwrap();
        assert!(follower.standby_list().is_empty());
    }

    #[test]
    fn early_copy_does_not_shadow_the_on_time_one() {
        let mut creator = seed_creator(1);
        creator.tick(at(1, 4));
        let kp = keypair_from_seed(&[1; 32]);
        let self_id = creator.self_node().unwrap().id;
        let body = ScaleRequest {
            node_id: self_id,
            timestamp: 7,
            counter: 2,
            scale: ScaleDirection::Up,
        };
        let payload = GossipPayload::Scaling(sign_obj(body, &kp).unwrap());
        let env = GossipEnvelope::originate(&payload, "early".into(), self_id).unwrap();

        // a peer with a fast clock already sits in cycle 2
        assert!(matches!(
            creator.handle_gossip(env.clone()),
            GossipOutcome::Dropped(DropReason::OutsideWindow)
        ));

        creator.tick(at(2, 1));
        assert!(matches!(
            creator.handle_gossip(env.clone()),
            GossipOutcome::Forward(_)
        ));
        assert!(matches!(
            creator.handle_gossip(env),
            GossipOutcome::Dropped(DropReason::Duplicate)
        ));
    }
}

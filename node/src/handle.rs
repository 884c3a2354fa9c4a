//! Shared runtime state and the executor for engine outputs.
//!
//! The cycle engine performs no I/O. Every tick and every handled request
//! returns [`CycleOutput`]s, and [`NodeHandle::dispatch`] carries them out:
//! gossip goes to the outbound queue, anything that waits on the network
//! runs in its own task and only re-takes the engine lock to record the
//! result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use shoal_consensus::{CycleCreator, CycleOutput, PendingTx, Quarter};
use shoal_messages::{routes, Ack, GossipEnvelope, SyncCyclesRequest};
use shoal_network::{post, robust_query, Broadcaster, GossipTarget, NetworkError, PeerAddr, Transport};
use shoal_types::{Archiver, Clock, JoinStrategy, KeyPair, Node, NodeId, NodeInfo, NodeStatus};

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;
use crate::sync::{self, Snapshot};
use crate::NodeError;

/// Fetch attempts for a record this node follows before giving up on it.
const FOLLOW_ATTEMPTS: u32 = 3;

/// Outputs together with the peer view they were produced under.
pub struct Batch {
    pub outputs: Vec<CycleOutput>,
    targets: Vec<GossipTarget>,
    self_id: Option<NodeId>,
    fanout: usize,
}

impl Batch {
    /// Capture the engine's gossip view alongside `outputs`. Call while the
    /// engine lock is still held.
    pub fn new(engine: &CycleCreator, outputs: Vec<CycleOutput>) -> Self {
        Self {
            outputs,
            targets: engine.gossip_targets(),
            self_id: engine.self_id(),
            fanout: engine.params().gossip_factor,
        }
    }
}

/// Cheaply cloneable handle to everything the node's tasks share.
#[derive(Clone)]
pub struct NodeHandle {
    pub(crate) engine: Arc<Mutex<CycleCreator>>,
    pub(crate) config: Arc<NodeConfig>,
    pub(crate) keys: Arc<KeyPair>,
    pub(crate) info: NodeInfo,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) metrics: Arc<NodeMetrics>,
    pub(crate) shutdown: ShutdownController,
    /// Signalled when a `POST /accepted` for this node arrives.
    pub(crate) accepted: Arc<Notify>,
    /// Set once a snapshot is installed or the network was bootstrapped.
    pub(crate) synced: Arc<AtomicBool>,
    resyncing: Arc<AtomicBool>,
    leaving: Arc<AtomicBool>,
}

impl NodeHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine: CycleCreator,
        config: NodeConfig,
        keys: KeyPair,
        info: NodeInfo,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        broadcaster: Broadcaster,
        metrics: NodeMetrics,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            config: Arc::new(config),
            keys: Arc::new(keys),
            info,
            transport,
            clock,
            broadcaster,
            metrics: Arc::new(metrics),
            shutdown: ShutdownController::new(),
            accepted: Arc::new(Notify::new()),
            synced: Arc::new(AtomicBool::new(false)),
            resyncing: Arc::new(AtomicBool::new(false)),
            leaving: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<CycleCreator>> {
        &self.engine
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub(crate) fn quarter(&self) -> Duration {
        Duration::from_millis(self.config.cycle.quarter_ms().max(1))
    }

    /// Status of this node in its own node list.
    pub async fn status(&self) -> Option<NodeStatus> {
        self.engine.lock().await.self_node().map(|n| n.status)
    }

    // ── Engine driving ──────────────────────────────────────────────────

    /// Advance the engine to the current time and carry out what it asks for.
    pub async fn tick(&self) {
        let now = self.now_ms();
        let batch = {
            let mut engine = self.engine.lock().await;
            let mut outputs = engine.tick(now);
            let q1_started = outputs
                .iter()
                .any(|o| matches!(o, CycleOutput::Quarter(e) if e.quarter == Quarter::Q1));
            if q1_started {
                outputs.extend(self.request_active_if_ready(&mut engine, now));
            }
            self.metrics.observe(
                engine.nodes(),
                engine.num_standby().unwrap_or(0) as usize,
                engine.counter(),
            );
            Batch::new(&engine, outputs)
        };
        self.dispatch(batch);
    }

    /// A synced node that is not active yet asks to be activated at every Q1.
    fn request_active_if_ready(&self, engine: &mut CycleCreator, now_ms: u64) -> Vec<CycleOutput> {
        if !self.is_synced() {
            return Vec::new();
        }
        let Some(status) = engine.self_node().map(|n| n.status) else {
            return Vec::new();
        };
        let eligible = match engine.params().join_strategy {
            JoinStrategy::V1 => matches!(status, NodeStatus::Syncing | NodeStatus::Ready),
            JoinStrategy::V2 => status == NodeStatus::Ready,
        };
        if !eligible {
            return Vec::new();
        }
        match engine.request_active(now_ms / 1000) {
            Ok(outputs) => {
                tracing::info!(counter = engine.counter(), "requesting activation");
                outputs
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not request activation");
                Vec::new()
            }
        }
    }

    /// Replace the engine state with a snapshot from the network and catch
    /// the quarter machine up to now.
    pub async fn install(&self, snapshot: Snapshot) -> Result<(), NodeError> {
        let now = self.now_ms();
        let batch = {
            let mut engine = self.engine.lock().await;
            engine.install_snapshot(
                snapshot.records,
                snapshot.nodes,
                snapshot.archivers,
                snapshot.standby,
                snapshot.tx_list,
            )?;
            let outputs = engine.tick(now);
            Batch::new(&engine, outputs)
        };
        self.synced.store(true, Ordering::Release);
        self.dispatch(batch);
        Ok(())
    }

    /// External addresses of the active nodes this node knows, itself excluded.
    pub async fn active_peers(&self) -> Vec<PeerAddr> {
        let engine = self.engine.lock().await;
        engine.gossip_targets().into_iter().map(|t| t.addr).collect()
    }

    // ── Output execution ────────────────────────────────────────────────

    /// Carry out a batch of engine outputs.
    pub fn dispatch(&self, batch: Batch) {
        let Batch {
            outputs,
            targets,
            self_id,
            fanout,
        } = batch;
        let exclude: Vec<NodeId> = self_id.into_iter().collect();

        for output in outputs {
            match output {
                CycleOutput::Quarter(event) => {
                    let _span = crate::tracing_spans::cycle_span(event.counter, &event.quarter.to_string())
                        .entered();
                    tracing::trace!("quarter started");
                }
                CycleOutput::Originate(envelope) => {
                    self.broadcaster
                        .gossip_to_subset(&envelope, &targets, &exclude, fanout);
                }
                CycleOutput::Verify(pending) => {
                    let this = self.clone();
                    tokio::spawn(async move { this.verify_local(pending).await });
                }
                CycleOutput::NotifyAccepted { to, notice } => {
                    let transport = Arc::clone(&self.transport);
                    tokio::spawn(async move {
                        let sent: Result<Ack, _> =
                            post(transport.as_ref(), &to, routes::HTTP_ACCEPTED, &notice).await;
                        match sent {
                            Ok(_) => tracing::debug!(peer = %to, "notified accepted candidate"),
                            Err(e) => tracing::debug!(peer = %to, error = %e, "accepted notice failed"),
                        }
                    });
                }
                CycleOutput::ProbeNodes(nodes) => {
                    let this = self.clone();
                    tokio::spawn(async move { this.probe_nodes(nodes).await });
                }
                CycleOutput::ProbeArchivers(archivers) => {
                    let this = self.clone();
                    tokio::spawn(async move { this.probe_archivers(archivers).await });
                }
                CycleOutput::Digested { counter, marker } => {
                    self.metrics.cycles_digested.inc();
                    tracing::debug!(counter, %marker, "cycle digested");
                }
                CycleOutput::AwaitRecord { counter } => {
                    let this = self.clone();
                    tokio::spawn(async move { this.follow(counter).await });
                }
                CycleOutput::FellBehind { counter, cycles } => {
                    tracing::warn!(counter, cycles, "fell behind the network, resyncing");
                    let this = self.clone();
                    tokio::spawn(async move { this.resync().await });
                }
                CycleOutput::IntegrityViolation { counter, reason } => {
                    tracing::error!(counter, %reason, "leaving the network");
                    let this = self.clone();
                    tokio::spawn(async move { this.apoptosize().await });
                }
                CycleOutput::Removed => {
                    tracing::warn!("removed from the node list, shutting down");
                    self.shutdown.shutdown();
                }
            }
        }
    }

    /// Forward gossip a peer sent us.
    pub(crate) fn forward(&self, envelope: &GossipEnvelope, targets: &[GossipTarget], exclude: &[NodeId], fanout: usize) {
        let result = self
            .broadcaster
            .gossip_to_subset(envelope, targets, exclude, fanout);
        if result.sent > 0 {
            self.metrics.gossip_forwarded.inc();
        }
        if result.failed > 0 {
            tracing::debug!(route = %envelope.route, failed = result.failed, "outbound queue full");
        }
    }

    async fn verify_local(&self, pending: PendingTx) {
        let ok = pending.verify().await;
        let admitted = self.engine.lock().await.commit_verified(&pending, ok);
        tracing::debug!(hash = %pending.hash(), ok, admitted, "local tx verified");
    }

    /// Run the verifier for a gossiped tx and forward it once admitted.
    pub(crate) async fn verify_gossip(&self, pending: PendingTx, envelope: GossipEnvelope, exclude: Vec<NodeId>) {
        let ok = pending.verify().await;
        let (admitted, targets, fanout) = {
            let mut engine = self.engine.lock().await;
            let admitted = engine.commit_verified(&pending, ok);
            (admitted, engine.gossip_targets(), engine.params().gossip_factor)
        };
        if admitted {
            self.forward(&envelope, &targets, &exclude, fanout);
        }
    }

    async fn probe_nodes(&self, nodes: Vec<Node>) {
        let checks = join_all(nodes.iter().map(|node| {
            let addr = PeerAddr::from(node);
            async move { (node.id, addr.clone(), self.transport.probe(&addr).await) }
        }))
        .await;

        let mut lost = Vec::new();
        for (id, addr, result) in checks {
            if let Err(e) = result {
                tracing::info!(node = %id, peer = %addr, error = %e, "node failed liveness check");
                lost.push(id);
            }
        }
        if lost.is_empty() {
            return;
        }
        let batch = {
            let mut engine = self.engine.lock().await;
            let mut outputs = Vec::new();
            for id in lost {
                match engine.report_lost(id) {
                    Ok(more) => outputs.extend(more),
                    Err(e) => tracing::warn!(node = %id, error = %e, "could not report lost node"),
                }
            }
            Batch::new(&engine, outputs)
        };
        self.dispatch(batch);
    }

    async fn probe_archivers(&self, archivers: Vec<Archiver>) {
        let checks = join_all(archivers.iter().map(|a| {
            let addr = PeerAddr::from(a);
            async move { (a.public_key, self.transport.probe(&addr).await) }
        }))
        .await;

        let down: Vec<_> = checks
            .into_iter()
            .filter_map(|(pk, r)| r.err().map(|e| (pk, e)))
            .collect();
        if down.is_empty() {
            return;
        }
        let batch = {
            let mut engine = self.engine.lock().await;
            let mut outputs = Vec::new();
            for (pk, e) in down {
                tracing::info!(archiver = %pk, error = %e, "archiver failed liveness check");
                match engine.report_lost_archiver(pk) {
                    Ok(more) => outputs.extend(more),
                    Err(e) => tracing::warn!(archiver = %pk, error = %e, "could not report lost archiver"),
                }
            }
            Batch::new(&engine, outputs)
        };
        self.dispatch(batch);
    }

    /// Follower: fetch the record for `counter` once the active nodes have
    /// digested it.
    async fn follow(&self, counter: u64) {
        let peers = self.active_peers().await;
        if peers.is_empty() {
            tracing::warn!(counter, "no active peers to follow");
            return;
        }
        let delay = self.quarter() / 4;
        for attempt in 1..=FOLLOW_ATTEMPTS {
            tokio::time::sleep(delay * attempt).await;
            let value = match self.fetch_record(&peers, counter).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(counter, attempt, error = %e, "record not available yet");
                    continue;
                }
            };
            let batch = {
                let mut engine = self.engine.lock().await;
                if engine.counter() != counter {
                    return;
                }
                let record = match engine.decode_record(&value) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(counter, error = %e, "peers served a malformed record");
                        return;
                    }
                };
                let outputs = engine.digest_foreign(record);
                Batch::new(&engine, outputs)
            };
            self.dispatch(batch);
            return;
        }
        tracing::warn!(counter, "gave up fetching cycle record");
    }

    async fn fetch_record(&self, peers: &[PeerAddr], counter: u64) -> Result<Value, NetworkError> {
        let transport = self.transport.as_ref();
        let range = SyncCyclesRequest {
            start: counter,
            end: counter,
        };
        let result = robust_query(
            peers,
            |peer: PeerAddr| async move {
                let records: Vec<Value> =
                    post(transport, &peer, routes::HTTP_SYNC_CYCLES, &range).await?;
                records.into_iter().next().ok_or(NetworkError::NoResponses)
            },
            |a: &Value, b: &Value| a == b,
            self.config.cycle.redundancy,
        )
        .await?;
        if !result.is_robust_result {
            self.metrics.robust_fallbacks.inc();
        }
        Ok(result.top_result)
    }

    async fn resync(&self) {
        if self.resyncing.swap(true, Ordering::AcqRel) {
            return;
        }
        let peers = self.active_peers().await;
        let result = async {
            if peers.is_empty() {
                return Err(NodeError::Sync("no active peers to resync from".into()));
            }
            let snapshot = sync::run(self, &peers).await?;
            self.install(snapshot).await
        }
        .await;
        match result {
            Ok(()) => tracing::info!("resynced with the network"),
            Err(e) => tracing::error!(error = %e, "resync failed"),
        }
        self.resyncing.store(false, Ordering::Release);
    }

    /// Propose this node's own removal, then stop once it had time to spread.
    async fn apoptosize(&self) {
        if self.leaving.swap(true, Ordering::AcqRel) {
            return;
        }
        self.metrics.apoptosis.inc();
        let batch = {
            let mut engine = self.engine.lock().await;
            match engine.propose_apoptosis() {
                Ok(outputs) => Some(Batch::new(&engine, outputs)),
                Err(e) => {
                    tracing::warn!(error = %e, "could not propose apoptosis");
                    None
                }
            }
        };
        if let Some(batch) = batch {
            self.dispatch(batch);
            tokio::time::sleep(self.quarter() * 2).await;
        }
        self.shutdown.shutdown();
    }
}

//! The Shoal node: wires the engine, the HTTP routes and the background
//! tasks together.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use shoal_consensus::CycleCreator;
use shoal_crypto::keypair_from_seed;
use shoal_messages::GossipEnvelope;
use shoal_network::{run_outbound, Broadcaster, PeerAddr, Transport};
use shoal_rpc::RpcServer;
use shoal_types::{Clock, KeyPair};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::handle::NodeHandle;
use crate::identity::node_info;
use crate::joiner;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;

/// Channel capacity for outbound gossip.
const OUTBOUND_CHANNEL_CAPACITY: usize = 4096;
/// How long `stop` waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A single node of a Shoal network.
pub struct ShoalNode {
    handle: NodeHandle,
    outbound_rx: Option<mpsc::Receiver<(PeerAddr, GossipEnvelope)>>,
    task_handles: Vec<JoinHandle<()>>,
}

impl ShoalNode {
    /// Build a node. Nothing runs until [`ShoalNode::start`].
    pub fn new(
        config: NodeConfig,
        keys: KeyPair,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let info = node_info(&config, &keys)?;
        // the engine signs its own gossip with a copy of the node key
        let engine = CycleCreator::with_retention(
            config.cycle.clone(),
            config.network,
            keypair_from_seed(&keys.private.0),
            config.retained_records,
        );
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let metrics = NodeMetrics::new()?;
        let handle = NodeHandle::new(
            engine,
            config,
            keys,
            info,
            transport,
            clock,
            Broadcaster::new(outbound_tx),
            metrics,
        );
        Ok(Self {
            handle,
            outbound_rx: Some(outbound_rx),
            task_handles: Vec::new(),
        })
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        self.handle.shutdown_controller()
    }

    /// The node's HTTP routes, for serving on a listener of the caller's
    /// choosing.
    pub fn router(&self) -> axum::Router {
        shoal_rpc::router(Arc::new(self.handle.clone()))
    }

    /// Start every background task: the gossip sender, the HTTP servers,
    /// then either a new network or the join client, and the tick loop.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let config = Arc::clone(&self.handle.config);
        tracing::info!(
            network = config.network.as_str(),
            public_key = %self.handle.keys.public,
            external = %config.external_addr(),
            strategy = ?config.cycle.join_strategy,
            "starting shoal node"
        );

        // ── Outbound gossip ─────────────────────────────────────────────
        let outbound_rx = self.outbound_rx.take().ok_or(NodeError::NotInitialized)?;
        let transport = Arc::clone(&self.handle.transport);
        let mut shutdown_rx = self.handle.shutdown.subscribe();
        self.task_handles.push(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {}
                _ = run_outbound(outbound_rx, transport) => {}
            }
        }));

        // ── HTTP ────────────────────────────────────────────────────────
        if config.enable_rpc {
            for addr in self.bind_addrs()? {
                self.spawn_rpc(addr);
            }
        }

        // ── Network membership ──────────────────────────────────────────
        if config.starts_network() {
            self.bootstrap().await?;
        } else {
            let seeds = config.seed_addrs()?;
            let handle = self.handle.clone();
            let mut shutdown_rx = self.handle.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {}
                    result = joiner::run(&handle, &seeds) => match result {
                        Ok(()) => tracing::info!("joined the network"),
                        Err(e) => {
                            tracing::error!(error = %e, "could not join the network");
                            handle.shutdown.shutdown();
                        }
                    },
                }
            }));
        }

        // ── Cycle ticks ─────────────────────────────────────────────────
        let handle = self.handle.clone();
        let mut shutdown_rx = self.handle.shutdown.subscribe();
        let period = Duration::from_millis(config.tick_interval_ms);
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => handle.tick().await,
                }
            }
        }));

        Ok(())
    }

    /// Create record 0 with this node as the only active member.
    async fn bootstrap(&self) -> Result<(), NodeError> {
        let now_secs = self.handle.now_ms() / 1000;
        let marker = self.handle.engine.lock().await.bootstrap_first(
            self.handle.info.clone(),
            now_secs,
            self.handle.config.archivers.clone(),
            now_secs,
        )?;
        self.handle.synced.store(true, Ordering::Release);
        tracing::info!(%marker, "started a new network");
        Ok(())
    }

    fn bind_addrs(&self) -> Result<Vec<SocketAddr>, NodeError> {
        let config = &self.handle.config;
        let mut ports = vec![config.external_port];
        if config.internal_port != config.external_port {
            ports.push(config.internal_port);
        }
        ports
            .into_iter()
            .map(|port| {
                format!("{}:{port}", config.bind_ip)
                    .parse()
                    .map_err(|e| NodeError::Config(format!("bind address {}:{port}: {e}", config.bind_ip)))
            })
            .collect()
    }

    fn spawn_rpc(&mut self, addr: SocketAddr) {
        let server = RpcServer::new(addr, Arc::new(self.handle.clone()));
        let shutdown = self.handle.shutdown.clone();
        let mut shutdown_rx = shutdown.subscribe();
        self.task_handles.push(tokio::spawn(async move {
            let stop = async move {
                let _ = shutdown_rx.recv().await;
            };
            if let Err(e) = server.start(stop).await {
                tracing::error!(%addr, error = %e, "rpc server failed");
                shutdown.shutdown();
            }
        }));
    }

    /// Signal shutdown and wait for the background tasks.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("stopping shoal node");
        self.handle.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "some tasks did not stop in time");
        }

        let engine = self.handle.engine.lock().await;
        tracing::info!(counter = engine.counter(), "shoal node stopped");
        Ok(())
    }
}

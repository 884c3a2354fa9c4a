//! The node side of the HTTP routes.

use async_trait::async_trait;
use tracing::Instrument;

use shoal_consensus::{list_hash, GossipOutcome, JoinError};
use shoal_crypto::verify_obj;
use shoal_messages::{
    routes, AcceptedNotice, Ack, CycleMarkerResponse, GossipEnvelope, HashResponse, JoinRequest,
    JoinResponse, JoinedResponse, JoinedV2Response, NewestCycleResponse, StandbyRefresh,
    SyncCyclesRequest, UnjoinRequest,
};
use shoal_network::reachability::probe_node;
use shoal_rpc::{NodeApi, RpcError};
use shoal_types::{Archiver, CycleRecord, Node, PublicKey, Signed, StandbyInfo, TxListEntry};

use crate::handle::{Batch, NodeHandle};
use crate::tracing_spans::{gossip_recv_span, rpc_span};

/// Most records served by one `POST /sync-cycles`.
pub const MAX_CYCLES_PER_REQUEST: u64 = 100;

fn not_ready() -> RpcError {
    RpcError::NotReady("no cycle record yet".into())
}

fn hash_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::Node(e.to_string())
}

impl NodeHandle {
    async fn gossip_inner(&self, envelope: GossipEnvelope) -> Ack {
        self.metrics.gossip_received.inc();
        let sender = envelope.sender;
        let origin = envelope.origin;
        let (outcome, targets, self_id, fanout) = {
            let mut engine = self.engine.lock().await;
            let outcome = engine.handle_gossip(envelope);
            (
                outcome,
                engine.gossip_targets(),
                engine.self_id(),
                engine.params().gossip_factor,
            )
        };
        let mut exclude = vec![sender, origin];
        exclude.extend(self_id);

        match outcome {
            GossipOutcome::Forward(envelope) => {
                self.forward(&envelope, &targets, &exclude, fanout);
                Ack::OK
            }
            GossipOutcome::Applied => Ack::OK,
            GossipOutcome::Verify(pending, envelope) => {
                let this = self.clone();
                tokio::spawn(async move { this.verify_gossip(pending, envelope, exclude).await });
                Ack::OK
            }
            GossipOutcome::Dropped(reason) => {
                self.metrics
                    .gossip_dropped
                    .with_label_values(&[reason.label()])
                    .inc();
                tracing::debug!(%reason, "gossip dropped");
                Ack { success: false }
            }
        }
    }

    fn refused(&self, e: JoinError) -> JoinResponse {
        tracing::debug!(error = %e, fatal = e.is_fatal(), "join-style request refused");
        self.metrics
            .join_requests
            .with_label_values(&[if e.is_fatal() { "fatal" } else { "refused" }])
            .inc();
        JoinResponse::rejected(e.to_string(), e.is_fatal())
    }

    async fn join_inner(&self, req: Signed<JoinRequest>) -> JoinResponse {
        // checks that need no I/O
        if let Err(e) = self.engine.lock().await.prevalidate_join(&req) {
            return self.refused(e);
        }

        // reachability, without the lock
        if let Err(e) = probe_node(self.transport(), &req.body.node_info).await {
            return self.refused(JoinError::Unreachable(e.to_string()));
        }

        let (result, num_standby) = {
            let mut engine = self.engine.lock().await;
            let result = engine
                .commit_join(req)
                .map(|outputs| Batch::new(&engine, outputs));
            (result, engine.num_standby())
        };
        match result {
            Ok(batch) => {
                self.metrics.join_requests.with_label_values(&["accepted"]).inc();
                self.dispatch(batch);
                JoinResponse::accepted(num_standby)
            }
            Err(e) => self.refused(e),
        }
    }
}

#[async_trait]
impl NodeApi for NodeHandle {
    async fn cycle_marker(&self) -> Result<CycleMarkerResponse, RpcError> {
        self.engine.lock().await.cycle_marker().ok_or_else(not_ready)
    }

    async fn join(&self, req: Signed<JoinRequest>) -> JoinResponse {
        let span = rpc_span(routes::HTTP_JOIN);
        self.join_inner(req).instrument(span).await
    }

    async fn unjoin(&self, req: Signed<UnjoinRequest>) -> JoinResponse {
        let result = {
            let mut engine = self.engine.lock().await;
            engine.unjoin(req).map(|outputs| Batch::new(&engine, outputs))
        };
        match result {
            Ok(batch) => {
                self.dispatch(batch);
                JoinResponse::accepted(None)
            }
            Err(e) => self.refused(e),
        }
    }

    async fn standby_refresh(&self, req: Signed<StandbyRefresh>) -> JoinResponse {
        let result = {
            let mut engine = self.engine.lock().await;
            engine
                .standby_refresh(req)
                .map(|outputs| Batch::new(&engine, outputs))
        };
        match result {
            Ok(batch) => {
                self.dispatch(batch);
                JoinResponse::accepted(None)
            }
            Err(e) => self.refused(e),
        }
    }

    async fn joined(&self, public_key: PublicKey) -> JoinedResponse {
        self.engine.lock().await.joined(&public_key)
    }

    async fn joined_v2(&self, public_key: PublicKey) -> JoinedV2Response {
        self.engine.lock().await.joined_v2(&public_key)
    }

    async fn newest_cycle(&self) -> NewestCycleResponse {
        NewestCycleResponse {
            newest_cycle: self.engine.lock().await.newest().cloned(),
        }
    }

    async fn cycles(&self, range: SyncCyclesRequest) -> Result<Vec<CycleRecord>, RpcError> {
        if range.end < range.start {
            return Err(RpcError::InvalidRequest("end is before start".into()));
        }
        let end = range
            .end
            .min(range.start.saturating_add(MAX_CYCLES_PER_REQUEST - 1));
        Ok(self.engine.lock().await.chain().range(range.start, end))
    }

    async fn gossip(&self, envelope: GossipEnvelope) -> Ack {
        let span = gossip_recv_span(&envelope.route, &envelope.sender.to_string());
        self.gossip_inner(envelope).instrument(span).await
    }

    async fn accepted(&self, notice: Signed<AcceptedNotice>) -> Ack {
        if verify_obj(&notice).is_err() || notice.body.public_key != self.keys.public {
            tracing::debug!("ignoring accepted notice not meant for this node");
            return Ack { success: false };
        }
        tracing::info!(counter = notice.body.counter, "notified of acceptance");
        self.accepted.notify_one();
        Ack::OK
    }

    async fn validator_list_hash(&self) -> Result<HashResponse, RpcError> {
        let hash = self.engine.lock().await.nodes().hash().map_err(hash_error)?;
        Ok(HashResponse { hash })
    }

    async fn validator_list(&self) -> Vec<Node> {
        self.engine.lock().await.nodes().by_id_order().cloned().collect()
    }

    async fn archiver_list_hash(&self) -> Result<HashResponse, RpcError> {
        let hash = self
            .engine
            .lock()
            .await
            .archivers()
            .hash()
            .map_err(hash_error)?;
        Ok(HashResponse { hash })
    }

    async fn archiver_list(&self) -> Vec<Archiver> {
        self.engine.lock().await.archivers().to_vec()
    }

    async fn standby_list_hash(&self) -> Result<HashResponse, RpcError> {
        let list = self.engine.lock().await.standby_list();
        let hash = list_hash(&list).map_err(hash_error)?;
        Ok(HashResponse { hash })
    }

    async fn standby_list(&self) -> Vec<StandbyInfo> {
        self.engine.lock().await.standby_list()
    }

    async fn tx_list_hash(&self) -> Result<HashResponse, RpcError> {
        let engine = self.engine.lock().await;
        let hash = list_hash(engine.tx_list()).map_err(hash_error)?;
        Ok(HashResponse { hash })
    }

    async fn tx_list(&self) -> Vec<TxListEntry> {
        self.engine.lock().await.tx_list().to_vec()
    }

    async fn current_cycle_hash(&self) -> Result<HashResponse, RpcError> {
        let engine = self.engine.lock().await;
        let entry = engine.chain().newest().ok_or_else(not_ready)?;
        Ok(HashResponse { hash: entry.marker })
    }

    async fn metrics(&self) -> Result<String, RpcError> {
        self.metrics
            .encode()
            .map_err(|e| RpcError::Server(e.to_string()))
    }
}

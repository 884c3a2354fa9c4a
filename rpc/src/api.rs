//! The seam between the HTTP server and the engine.

use async_trait::async_trait;
use shoal_messages::{
    AcceptedNotice, Ack, CycleMarkerResponse, GossipEnvelope, HashResponse, JoinRequest,
    JoinResponse, JoinedResponse, JoinedV2Response, NewestCycleResponse, StandbyRefresh,
    SyncCyclesRequest, UnjoinRequest,
};
use shoal_types::{Archiver, CycleRecord, Node, PublicKey, Signed, StandbyInfo, TxListEntry};

use crate::RpcError;

/// Everything the router needs from a running node.
///
/// Bodies arrive already schema-checked and decoded. Join-style routes report
/// refusals inside their [`JoinResponse`] rather than as errors, so that a
/// candidate can tell a fatal refusal from a retryable one.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn cycle_marker(&self) -> Result<CycleMarkerResponse, RpcError>;

    async fn join(&self, req: Signed<JoinRequest>) -> JoinResponse;

    async fn unjoin(&self, req: Signed<UnjoinRequest>) -> JoinResponse;

    async fn standby_refresh(&self, req: Signed<StandbyRefresh>) -> JoinResponse;

    async fn joined(&self, public_key: PublicKey) -> JoinedResponse;

    async fn joined_v2(&self, public_key: PublicKey) -> JoinedV2Response;

    async fn newest_cycle(&self) -> NewestCycleResponse;

    /// Records with `start <= counter <= end`, oldest first.
    async fn cycles(&self, range: SyncCyclesRequest) -> Result<Vec<CycleRecord>, RpcError>;

    async fn gossip(&self, envelope: GossipEnvelope) -> Ack;

    async fn accepted(&self, notice: Signed<AcceptedNotice>) -> Ack;

    async fn validator_list_hash(&self) -> Result<HashResponse, RpcError>;

    async fn validator_list(&self) -> Vec<Node>;

    async fn archiver_list_hash(&self) -> Result<HashResponse, RpcError>;

    async fn archiver_list(&self) -> Vec<Archiver>;

    async fn standby_list_hash(&self) -> Result<HashResponse, RpcError>;

    async fn standby_list(&self) -> Vec<StandbyInfo>;

    async fn tx_list_hash(&self) -> Result<HashResponse, RpcError>;

    async fn tx_list(&self) -> Vec<TxListEntry>;

    /// Marker of the newest record.
    async fn current_cycle_hash(&self) -> Result<HashResponse, RpcError>;

    /// Prometheus text exposition.
    async fn metrics(&self) -> Result<String, RpcError>;
}

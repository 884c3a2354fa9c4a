//! Route handlers.
//!
//! POST bodies are taken as raw JSON and checked against the message field
//! tables before decoding, so malformed input is a 400 with the failing
//! field named.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shoal_messages::schema::{self, FieldSpec};
use shoal_messages::{
    AcceptedNotice, Ack, CycleMarkerResponse, GossipEnvelope, HashResponse, JoinRequest,
    JoinResponse, JoinedResponse, JoinedV2Response, NewestCycleResponse, StandbyRefresh,
    SyncCyclesRequest, UnjoinRequest,
};
use shoal_types::{Archiver, CycleRecord, Node, PublicKey, Signed, StandbyInfo, TxListEntry};
use std::sync::Arc;

use crate::{NodeApi, RpcError};

pub type ApiState = Arc<dyn NodeApi>;

/// Validate `body` against `fields`, then decode it.
pub fn decode_body<T: DeserializeOwned>(body: Value, fields: &[FieldSpec]) -> Result<T, RpcError> {
    schema::validate(&body, fields)?;
    Ok(serde_json::from_value(body)?)
}

fn parse_public_key(raw: &str) -> Result<PublicKey, RpcError> {
    raw.parse()
        .map_err(|e| RpcError::InvalidRequest(format!("public key: {e}")))
}

pub async fn cycle_marker(State(api): State<ApiState>) -> Result<Json<CycleMarkerResponse>, RpcError> {
    api.cycle_marker().await.map(Json)
}

pub async fn join(State(api): State<ApiState>, Json(body): Json<Value>) -> Result<Json<JoinResponse>, RpcError> {
    let req: Signed<JoinRequest> = decode_body(body, schema::JOIN_REQUEST)?;
    Ok(Json(api.join(req).await))
}

pub async fn unjoin(State(api): State<ApiState>, Json(body): Json<Value>) -> Result<Json<JoinResponse>, RpcError> {
    let req: Signed<UnjoinRequest> = decode_body(body, schema::UNJOIN)?;
    Ok(Json(api.unjoin(req).await))
}

pub async fn standby_refresh(
    State(api): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<JoinResponse>, RpcError> {
    let req: Signed<StandbyRefresh> = decode_body(body, schema::STANDBY_REFRESH)?;
    Ok(Json(api.standby_refresh(req).await))
}

pub async fn joined(State(api): State<ApiState>, Path(pk): Path<String>) -> Result<Json<JoinedResponse>, RpcError> {
    let pk = parse_public_key(&pk)?;
    Ok(Json(api.joined(pk).await))
}

pub async fn joined_v2(
    State(api): State<ApiState>,
    Path(pk): Path<String>,
) -> Result<Json<JoinedV2Response>, RpcError> {
    let pk = parse_public_key(&pk)?;
    Ok(Json(api.joined_v2(pk).await))
}

pub async fn newest_cycle(State(api): State<ApiState>) -> Json<NewestCycleResponse> {
    Json(api.newest_cycle().await)
}

pub async fn cycles(State(api): State<ApiState>, Json(body): Json<Value>) -> Result<Json<Vec<CycleRecord>>, RpcError> {
    let range: SyncCyclesRequest = decode_body(body, schema::SYNC_CYCLES)?;
    if range.start > range.end {
        return Err(RpcError::InvalidRequest(format!(
            "start {} is after end {}",
            range.start, range.end
        )));
    }
    api.cycles(range).await.map(Json)
}

pub async fn gossip(State(api): State<ApiState>, Json(body): Json<Value>) -> Result<Json<Ack>, RpcError> {
    let envelope: GossipEnvelope = decode_body(body, schema::ENVELOPE)?;
    Ok(Json(api.gossip(envelope).await))
}

pub async fn accepted(State(api): State<ApiState>, Json(body): Json<Value>) -> Result<Json<Ack>, RpcError> {
    let notice: Signed<AcceptedNotice> = decode_body(body, schema::ACCEPTED)?;
    Ok(Json(api.accepted(notice).await))
}

pub async fn validator_list_hash(State(api): State<ApiState>) -> Result<Json<HashResponse>, RpcError> {
    api.validator_list_hash().await.map(Json)
}

pub async fn validator_list(State(api): State<ApiState>) -> Json<Vec<Node>> {
    Json(api.validator_list().await)
}

pub async fn archiver_list_hash(State(api): State<ApiState>) -> Result<Json<HashResponse>, RpcError> {
    api.archiver_list_hash().await.map(Json)
}

pub async fn archiver_list(State(api): State<ApiState>) -> Json<Vec<Archiver>> {
    Json(api.archiver_list().await)
}

pub async fn standby_list_hash(State(api): State<ApiState>) -> Result<Json<HashResponse>, RpcError> {
    api.standby_list_hash().await.map(Json)
}

pub async fn standby_list(State(api): State<ApiState>) -> Json<Vec<StandbyInfo>> {
    Json(api.standby_list().await)
}

pub async fn tx_list_hash(State(api): State<ApiState>) -> Result<Json<HashResponse>, RpcError> {
    api.tx_list_hash().await.map(Json)
}

pub async fn tx_list(State(api): State<ApiState>) -> Json<Vec<TxListEntry>> {
    Json(api.tx_list().await)
}

pub async fn current_cycle_hash(State(api): State<ApiState>) -> Result<Json<HashResponse>, RpcError> {
    api.current_cycle_hash().await.map(Json)
}

pub async fn metrics(State(api): State<ApiState>) -> Result<impl IntoResponse, RpcError> {
    let body = api.metrics().await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

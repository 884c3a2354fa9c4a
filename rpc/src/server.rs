//! Axum-based RPC server.

use axum::routing::{get, post};
use axum::Router;
use shoal_messages::routes;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::RpcError;
use crate::handlers::{self, ApiState};
use crate::NodeApi;

/// Every route the node serves, bound to `api`.
pub fn router(api: Arc<dyn NodeApi>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::<ApiState>::new()
        .route(routes::HTTP_CYCLE_MARKER, get(handlers::cycle_marker))
        .route(routes::HTTP_JOIN, post(handlers::join))
        .route(routes::HTTP_UNJOIN, post(handlers::unjoin))
        .route(routes::HTTP_STANDBY_REFRESH, post(handlers::standby_refresh))
        .route(&format!("{}/:public_key", routes::HTTP_JOINED), get(handlers::joined))
        .route(&format!("{}/:public_key", routes::HTTP_JOINED_V2), get(handlers::joined_v2))
        .route(routes::HTTP_SYNC_NEWEST_CYCLE, get(handlers::newest_cycle))
        .route(routes::HTTP_SYNC_CYCLES, post(handlers::cycles))
        .route(routes::HTTP_GOSSIP, post(handlers::gossip))
        .route(routes::HTTP_ACCEPTED, post(handlers::accepted))
        .route(routes::HTTP_VALIDATOR_LIST_HASH, get(handlers::validator_list_hash))
        .route(routes::HTTP_VALIDATOR_LIST, get(handlers::validator_list))
        .route(routes::HTTP_ARCHIVER_LIST_HASH, get(handlers::archiver_list_hash))
        .route(routes::HTTP_ARCHIVER_LIST, get(handlers::archiver_list))
        .route(routes::HTTP_STANDBY_LIST_HASH, get(handlers::standby_list_hash))
        .route(routes::HTTP_STANDBY_LIST, get(handlers::standby_list))
        .route(routes::HTTP_TX_LIST_HASH, get(handlers::tx_list_hash))
        .route(routes::HTTP_TX_LIST, get(handlers::tx_list))
        .route(routes::HTTP_CURRENT_CYCLE_HASH, get(handlers::current_cycle_hash))
        .route(routes::HTTP_METRICS, get(handlers::metrics))
        .layer(cors)
        .with_state(api)
}

pub struct RpcServer {
    pub addr: SocketAddr,
    api: Arc<dyn NodeApi>,
}

impl RpcServer {
    pub fn new(addr: SocketAddr, api: Arc<dyn NodeApi>) -> Self {
        Self { addr, api }
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn start<F>(self, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| RpcError::Server(format!("bind {}: {e}", self.addr)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map_err(|e| RpcError::Server(e.to_string()))?;
        tracing::info!(addr = %local, "rpc server listening");
        axum::serve(listener, router(self.api))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| RpcError::Server(e.to_string()))?;
        tracing::info!(addr = %local, "rpc server stopped");
        Ok(())
    }
}

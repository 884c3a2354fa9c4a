//! Nullable network — an in-process transport.
//!
//! Each simulated node registers its router under its external address.
//! Requests are handed straight to that router with `oneshot`, so the full
//! handler stack (schema checks, status codes) runs without a socket.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request};
use axum::Router;
use serde_json::Value;
use shoal_messages::{routes, GossipEnvelope};
use shoal_network::{NetworkError, PeerAddr, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tower::ServiceExt;

/// Largest response body the null network will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A test network that routes requests between in-process routers.
#[derive(Default)]
pub struct NullNetwork {
    routers: RwLock<HashMap<PeerAddr, Router>>,
    /// Addresses that accept connections without serving HTTP (internal ports).
    listening: RwLock<HashSet<PeerAddr>>,
    /// Addresses that refuse everything, registered or not.
    down: RwLock<HashSet<PeerAddr>>,
    gossip_sent: AtomicUsize,
    requests: AtomicUsize,
}

impl NullNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `router` at `addr`.
    pub fn register(&self, addr: PeerAddr, router: Router) {
        if let Ok(mut routers) = self.routers.write() {
            routers.insert(addr, router);
        }
    }

    pub fn unregister(&self, addr: &PeerAddr) {
        if let Ok(mut routers) = self.routers.write() {
            routers.remove(addr);
        }
    }

    /// Accept probes at `addr` without serving anything.
    pub fn listen(&self, addr: PeerAddr) {
        if let Ok(mut listening) = self.listening.write() {
            listening.insert(addr);
        }
    }

    /// Make `addr` refuse connections until [`NullNetwork::set_up`].
    pub fn set_down(&self, addr: PeerAddr) {
        if let Ok(mut down) = self.down.write() {
            down.insert(addr);
        }
    }

    pub fn set_up(&self, addr: &PeerAddr) {
        if let Ok(mut down) = self.down.write() {
            down.remove(addr);
        }
    }

    /// Gossip envelopes delivered so far.
    pub fn gossip_sent(&self) -> usize {
        self.gossip_sent.load(Ordering::SeqCst)
    }

    /// HTTP requests of any kind delivered so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn is_down(&self, addr: &PeerAddr) -> bool {
        self.down.read().map(|d| d.contains(addr)).unwrap_or(false)
    }

    fn router_for(&self, addr: &PeerAddr) -> Result<Router, NetworkError> {
        if self.is_down(addr) {
            return Err(NetworkError::ConnectionFailed(format!("{addr} is down")));
        }
        self.routers
            .read()
            .ok()
            .and_then(|routers| routers.get(addr).cloned())
            .ok_or_else(|| NetworkError::ConnectionFailed(format!("nothing listens at {addr}")))
    }

    async fn dispatch(
        &self,
        to: &PeerAddr,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, NetworkError> {
        let router = self.router_for(to)?;
        let url = format!("http://{to}{path}");
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        self.requests.fetch_add(1, Ordering::SeqCst);
        let response = router
            .oneshot(request)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::trace!(%url, status = status.as_u16(), "null network: request failed");
            return Err(NetworkError::Http {
                url,
                status: status.as_u16(),
            });
        }
        let bytes = to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Transport for NullNetwork {
    async fn send_gossip(
        &self,
        to: &PeerAddr,
        envelope: &GossipEnvelope,
    ) -> Result<(), NetworkError> {
        let body = serde_json::to_value(envelope)?;
        self.dispatch(to, Method::POST, routes::HTTP_GOSSIP, Some(&body))
            .await?;
        self.gossip_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_json(&self, to: &PeerAddr, path: &str) -> Result<Value, NetworkError> {
        self.dispatch(to, Method::GET, path, None).await
    }

    async fn post_json(
        &self,
        to: &PeerAddr,
        path: &str,
        body: &Value,
    ) -> Result<Value, NetworkError> {
        self.dispatch(to, Method::POST, path, Some(body)).await
    }

    async fn probe(&self, addr: &PeerAddr) -> Result<(), NetworkError> {
        let known = self
            .routers
            .read()
            .map(|r| r.contains_key(addr))
            .unwrap_or(false)
            || self
                .listening
                .read()
                .map(|l| l.contains(addr))
                .unwrap_or(false);
        if known && !self.is_down(addr) {
            Ok(())
        } else {
            Err(NetworkError::Unreachable {
                addr: addr.to_string(),
                reason: "connection refused".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::Json;
    use serde_json::json;

    fn echo_router() -> Router {
        Router::new()
            .route("/ping", get(|| async { Json(json!({ "pong": true })) }))
            .route(
                routes::HTTP_GOSSIP,
                post(|Json(body): Json<Value>| async move { Json(json!({ "success": body.is_object() })) }),
            )
    }

    #[tokio::test]
    async fn routes_requests_to_the_registered_router() {
        let net = NullNetwork::new();
        let addr = PeerAddr::new("10.0.0.1", 9001);
        net.register(addr.clone(), echo_router());

        let value = net.get_json(&addr, "/ping").await.unwrap();
        assert_eq!(value["pong"], true);
        assert!(net.probe(&addr).await.is_ok());
        assert_eq!(net.requests(), 1);
    }

    #[tokio::test]
    async fn unknown_routes_and_hosts_fail() {
        let net = NullNetwork::new();
        let addr = PeerAddr::new("10.0.0.1", 9001);
        net.register(addr.clone(), echo_router());

        let err = net.get_json(&addr, "/missing").await.unwrap_err();
        assert!(matches!(err, NetworkError::Http { status: 404, .. }));

        let elsewhere = PeerAddr::new("10.0.0.2", 9001);
        assert!(net.get_json(&elsewhere, "/ping").await.is_err());
        assert!(net.probe(&elsewhere).await.is_err());
    }

    #[tokio::test]
    async fn down_hosts_refuse_until_brought_back() {
        let net = NullNetwork::new();
        let addr = PeerAddr::new("10.0.0.1", 9001);
        let internal = PeerAddr::new("10.0.0.1", 10001);
        net.register(addr.clone(), echo_router());
        net.listen(internal.clone());
        assert!(net.probe(&internal).await.is_ok());

        net.set_down(addr.clone());
        assert!(net.probe(&addr).await.is_err());
        assert!(net.get_json(&addr, "/ping").await.is_err());

        net.set_up(&addr);
        assert!(net.get_json(&addr, "/ping").await.is_ok());
    }

    #[tokio::test]
    async fn gossip_is_posted_and_counted() {
        let net = NullNetwork::new();
        let addr = PeerAddr::new("10.0.0.1", 9001);
        net.register(addr.clone(), echo_router());
        let envelope = GossipEnvelope {
            route: routes::GOSSIP_ACTIVE.into(),
            payload: json!({}),
            tracker: "t".into(),
            sender: shoal_types::Hash256::new([1; 32]),
            origin: shoal_types::Hash256::new([1; 32]),
        };
        net.send_gossip(&addr, &envelope).await.unwrap();
        assert_eq!(net.gossip_sent(), 1);
    }
}

//! HTTP server for the Shoal node.
//!
//! Serves the join routes used by candidates, the sync routes used by
//! joining nodes and archivers, the internal `/gossip` and `/accepted`
//! routes, the list and hash routes used by list sync, and `/metrics`.
//!
//! The server knows nothing about the engine. Everything goes through the
//! [`NodeApi`] trait, which the node crate implements.

pub mod api;
pub mod error;
pub mod handlers;
pub mod server;

pub use api::NodeApi;
pub use error::RpcError;
pub use server::{router, RpcServer};

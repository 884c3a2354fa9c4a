//! Span constructors for recurring node operations, so that the same names
//! and fields show up in every log line that belongs to them.

use tracing::{debug_span, info_span, Span};

/// One quarter of one cycle.
pub fn cycle_span(counter: u64, quarter: &str) -> Span {
    info_span!("cycle", counter = counter, quarter = %quarter)
}

/// Handling of a single inbound gossip message.
pub fn gossip_recv_span(route: &str, sender: &str) -> Span {
    debug_span!("gossip_recv", route = %route, sender = %sender)
}

/// A full sync run against the network.
pub fn sync_span(strategy: &str) -> Span {
    info_span!("sync", strategy = %strategy)
}

/// The join client, from marker fetch until the node is syncing.
pub fn join_span(public_key: &str) -> Span {
    info_span!("join", public_key = %public_key)
}

/// A single HTTP route handled for a peer.
pub fn rpc_span(route: &str) -> Span {
    debug_span!("rpc", route = %route)
}

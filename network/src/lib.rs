//! Networking layer for the Shoal runtime.
//!
//! Everything between the consensus engine and the wire: the [`Transport`]
//! seam and its HTTP implementation, gossip fan-out and dedup, quorum
//! queries, reachability probes and the pre-join clock check.

pub mod broadcast;
pub mod clock_sync;
pub mod dedup;
pub mod error;
pub mod http;
pub mod reachability;
pub mod robust;
pub mod transport;

pub use broadcast::{run_outbound, BroadcastResult, Broadcaster, GossipTarget};
pub use clock_sync::ClockSync;
pub use dedup::MessageDedup;
pub use error::NetworkError;
pub use http::HttpTransport;
pub use robust::{robust_query, RobustQueryResult, MAX_QUERY_ROUNDS};
pub use transport::{fetch, post, PeerAddr, Transport};

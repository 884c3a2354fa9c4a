//! Shoal node runtime.
//!
//! The node is the coordinator around the cycle engine that:
//! - Ticks the quarter state machine against the clock
//! - Serves the public and internal HTTP routes
//! - Sends and forwards gossip
//! - Runs the join client and the sync protocols
//! - Probes peers and archivers for the lost-node reports
//! - Leaves the network (apoptosis) when its chain cannot be trusted

pub mod api;
pub mod config;
pub mod error;
pub mod handle;
pub mod identity;
pub mod joiner;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;
pub mod sync;
pub mod sync_v2;
pub mod tracing_spans;

pub use api::MAX_CYCLES_PER_REQUEST;
pub use config::{NodeConfig, SyncStrategy};
pub use error::NodeError;
pub use handle::{Batch, NodeHandle};
pub use identity::{load_keys, node_info};
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::ShoalNode;
pub use shutdown::ShutdownController;
pub use sync::Snapshot;

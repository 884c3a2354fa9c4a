//! Cycle consensus: the agreed sequence of cycle records and the node list
//! it implies.
//!
//! Time is cut into fixed-length cycles of four quarters. During Q1-Q2 nodes
//! gossip signed proposals, at Q3 every active node builds the next record
//! from what it collected, and at Q4 the record is digested: its marker is
//! appended to the chain and its changes are applied to the node list.
//!
//! ## Module overview
//!
//! - [`creator`] — the quarter state machine driving everything below.
//! - [`submodule`] — the contract each record-field owner implements.
//! - [`submodules`] — the registered submodules in record-writing order.
//! - [`join`] — admission, direct ([`join::JoinV1`]) or via standby ([`join::JoinV2`]).
//! - [`active`] — syncing, ready and active transitions.
//! - [`autoscale`] — desired network size votes.
//! - [`modes`] — the network mode machine.
//! - [`service_queue`] — the replicated network tx list.
//! - [`lost`] / [`lost_archivers`] — liveness reports and refutations.
//! - [`apoptosis`] — voluntary removal.
//! - [`rotation`] — removing the oldest nodes when over size.
//! - [`record`] — record assembly.
//! - [`nodelist`] / [`archivers`] / [`chain`] — engine state.
//! - [`squasher`] — folding record changes for sync.
//! - [`quarter`] — the quarter schedule.

pub mod active;
pub mod apoptosis;
pub mod archivers;
pub mod autoscale;
pub mod chain;
pub mod creator;
pub mod error;
pub mod join;
pub mod lost;
pub mod lost_archivers;
pub mod modes;
pub mod nodelist;
pub mod quarter;
pub mod record;
pub mod rotation;
pub mod service_queue;
pub mod squasher;
pub mod submodule;
pub mod submodules;

pub use archivers::ArchiverList;
pub use chain::{marker_of, ChainEntry, CycleChain, DEFAULT_RETAINED_RECORDS};
pub use creator::{CycleCreator, CycleOutput, DropReason, GossipOutcome, Participation};
pub use error::ConsensusError;
pub use join::{Admission, JoinError};
pub use modes::next_mode;
pub use nodelist::{list_hash, Change, NodeList, NodeUpdate};
pub use quarter::{Quarter, QuarterEvent, QuarterObservers};
pub use record::BuiltRecord;
pub use service_queue::{tx_hash, PendingTx, ServiceQueue, TxVerifier};
pub use squasher::ChangeSquasher;
pub use submodule::{CycleContext, GossipVerdict, Submodule};
pub use submodules::Submodules;

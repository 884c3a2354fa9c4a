//! Network message types for Shoal node-to-node communication.
//!
//! - [`payloads`]: the signed per-cycle proposals each submodule gossips
//! - [`gossip`]: the flood envelope and the typed view of its payload
//! - [`query`]: request and response bodies of the HTTP routes
//! - [`schema`]: structural validation of raw JSON before decoding
//! - [`routes`]: route names shared by the transport and the server

pub mod error;
pub mod gossip;
pub mod payloads;
pub mod query;
pub mod routes;
pub mod schema;

pub use error::MessageError;
pub use gossip::{GossipEnvelope, GossipPayload};
pub use payloads::{
    ActiveRequest, ApoptosisProposal, JoinRequest, LostArchiverDown, LostArchiverUp, LostReport,
    LostUp, RemoveTx, ScaleDirection, ScaleRequest, StandbyRefresh, SyncFinished, SyncStarted,
    UnjoinRequest,
};
pub use query::{
    AcceptedNotice, Ack, CycleMarkerResponse, HashResponse, JoinResponse, JoinedResponse,
    JoinedV2Response, NewestCycleResponse, SyncCyclesRequest,
};
pub use schema::{FieldKind, FieldSpec, SchemaError};

//! Route names.
//!
//! Gossip routes name the payload type inside a `/gossip` envelope. HTTP
//! paths are served by the node's router and called by the transport.

pub const GOSSIP_JOIN: &str = "gossip-join";
pub const GOSSIP_VALID_JOIN_REQUESTS: &str = "gossip-valid-join-requests";
pub const GOSSIP_UNJOIN: &str = "gossip-unjoin";
pub const GOSSIP_SYNC_STARTED: &str = "gossip-sync-started";
pub const GOSSIP_SYNC_FINISHED: &str = "gossip-sync-finished";
pub const GOSSIP_STANDBY_REFRESH: &str = "gossip-standby-refresh";
pub const GOSSIP_ACTIVE: &str = "gossip-active";
pub const SCALING: &str = "scaling";
pub const GOSSIP_ADDTX: &str = "gossip-addtx";
pub const GOSSIP_REMOVETX: &str = "gossip-removetx";
pub const LOST_ARCHIVER_UP: &str = "lost-archiver-up";
pub const LOST_ARCHIVER_DOWN: &str = "lost-archiver-down";
pub const LOST_DOWN: &str = "lost-down";
pub const LOST_UP: &str = "lost-up";
pub const APOPTOSIZE: &str = "apoptosize";

pub const HTTP_CYCLE_MARKER: &str = "/cyclemarker";
pub const HTTP_JOIN: &str = "/join";
pub const HTTP_UNJOIN: &str = "/unjoin";
pub const HTTP_STANDBY_REFRESH: &str = "/standby-refresh";
pub const HTTP_JOINED: &str = "/joined";
pub const HTTP_JOINED_V2: &str = "/joinedV2";
pub const HTTP_SYNC_NEWEST_CYCLE: &str = "/sync-newest-cycle";
pub const HTTP_SYNC_CYCLES: &str = "/sync-cycles";
pub const HTTP_GOSSIP: &str = "/gossip";
pub const HTTP_ACCEPTED: &str = "/accepted";
pub const HTTP_VALIDATOR_LIST_HASH: &str = "/validator-list-hash";
pub const HTTP_VALIDATOR_LIST: &str = "/validator-list";
pub const HTTP_ARCHIVER_LIST_HASH: &str = "/archiver-list-hash";
pub const HTTP_ARCHIVER_LIST: &str = "/archiver-list";
pub const HTTP_STANDBY_LIST_HASH: &str = "/standby-list-hash";
pub const HTTP_STANDBY_LIST: &str = "/standby-list";
pub const HTTP_TX_LIST_HASH: &str = "/tx-list-hash";
pub const HTTP_TX_LIST: &str = "/tx-list";
pub const HTTP_CURRENT_CYCLE_HASH: &str = "/current-cycle-hash";
pub const HTTP_METRICS: &str = "/metrics";

//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use shoal_consensus::DEFAULT_RETAINED_RECORDS;
use shoal_network::PeerAddr;
use shoal_types::{Archiver, CycleParams, NetworkId};

use crate::NodeError;

/// How a joined node fetches the network state before it starts following.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Walk the chain backwards from the newest record, squashing changes.
    V1,
    /// Agree on list hashes, then download the lists.
    V2,
}

/// Configuration for a Shoal node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Protocol tunables live in the
/// `[cycle]` table and must match across the network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to connect to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Cycle parameters (the `[cycle]` table).
    #[serde(default)]
    pub cycle: CycleParams,

    /// Address other nodes and join candidates reach this node at.
    #[serde(default = "default_ip")]
    pub external_ip: String,

    #[serde(default = "default_external_port")]
    pub external_port: u16,

    /// Address announced for node-to-node traffic inside a deployment.
    #[serde(default = "default_ip")]
    pub internal_ip: String,

    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Interface the HTTP servers bind on.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// `ip:port` of nodes already in the network. Empty starts a new network
    /// with this node as its first member.
    #[serde(default)]
    pub seed_nodes: Vec<String>,

    /// Archivers seeded into record 0 when starting a new network.
    #[serde(default)]
    pub archivers: Vec<Archiver>,

    /// Which sync protocol to run after being accepted.
    #[serde(default = "default_sync_strategy")]
    pub sync_strategy: SyncStrategy,

    /// Hex-encoded 32-byte key seed. Takes precedence over `key_file`.
    #[serde(default)]
    pub key_seed: Option<String>,

    /// File holding the hex key seed; created on first start if missing.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Whether to serve the HTTP routes. Tests wire routers in-process instead.
    #[serde(default = "default_true")]
    pub enable_rpc: bool,

    /// Whether to check the local clock against NTP before joining.
    #[serde(default = "default_true")]
    pub check_clock: bool,

    /// Largest tolerated offset from NTP time, in milliseconds.
    #[serde(default = "default_max_drift_ms")]
    pub max_drift_ms: i64,

    /// How often the cycle engine is ticked.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Timeout for outbound HTTP requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Cycle records kept in memory and served to syncing nodes.
    #[serde(default = "default_retained_records")]
    pub retained_records: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_external_port() -> u16 {
    NetworkId::Dev.default_port()
}

fn default_internal_port() -> u16 {
    NetworkId::Dev.default_port() + 1000
}

fn default_sync_strategy() -> SyncStrategy {
    SyncStrategy::V2
}

fn default_true() -> bool {
    true
}

fn default_max_drift_ms() -> i64 {
    5_000
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_retained_records() -> usize {
    DEFAULT_RETAINED_RECORDS
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.cycle.cycle_duration < 4 {
            return Err(NodeError::Config(
                "cycle.cycle_duration must be at least 4 seconds".into(),
            ));
        }
        if self.cycle.min_nodes == 0 || self.cycle.max_nodes < self.cycle.min_nodes {
            return Err(NodeError::Config(
                "cycle.min_nodes must be positive and not above cycle.max_nodes".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(NodeError::Config("tick_interval_ms must be positive".into()));
        }
        self.seed_addrs()?;
        Ok(())
    }

    /// Parsed `seed_nodes`.
    pub fn seed_addrs(&self) -> Result<Vec<PeerAddr>, NodeError> {
        self.seed_nodes.iter().map(|s| parse_peer(s)).collect()
    }

    pub fn external_addr(&self) -> PeerAddr {
        PeerAddr::new(self.external_ip.clone(), self.external_port)
    }

    pub fn internal_addr(&self) -> PeerAddr {
        PeerAddr::new(self.internal_ip.clone(), self.internal_port)
    }

    /// Whether this node starts a new network instead of joining one.
    pub fn starts_network(&self) -> bool {
        self.seed_nodes.is_empty()
    }
}

fn parse_peer(s: &str) -> Result<PeerAddr, NodeError> {
    let (ip, port) = s
        .rsplit_once(':')
        .ok_or_else(|| NodeError::Config(format!("seed node `{s}` is not ip:port")))?;
    let port = port
        .parse()
        .map_err(|_| NodeError::Config(format!("seed node `{s}` has a bad port")))?;
    Ok(PeerAddr::new(ip, port))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            cycle: CycleParams::default(),
            external_ip: default_ip(),
            external_port: default_external_port(),
            internal_ip: default_ip(),
            internal_port: default_internal_port(),
            bind_ip: default_bind_ip(),
            seed_nodes: Vec::new(),
            archivers: Vec::new(),
            sync_strategy: default_sync_strategy(),
            key_seed: None,
            key_file: None,
            enable_rpc: default_true(),
            check_clock: default_true(),
            max_drift_ms: default_max_drift_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retained_records: default_retained_records(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

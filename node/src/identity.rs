//! Node keys and the self description sent with join requests.

use std::path::Path;

use shoal_crypto::{curve_public_key, generate_keypair, keypair_from_seed};
use shoal_types::{KeyPair, NodeInfo};

use crate::config::NodeConfig;
use crate::NodeError;

/// Keys from `key_seed`, then `key_file` (created on first use), then a
/// throwaway key.
pub fn load_keys(config: &NodeConfig) -> Result<KeyPair, NodeError> {
    if let Some(seed) = &config.key_seed {
        return keys_from_hex(seed);
    }
    if let Some(path) = &config.key_file {
        return load_or_create(path);
    }
    tracing::warn!("no key_seed or key_file configured, using an ephemeral key");
    Ok(generate_keypair())
}

fn keys_from_hex(s: &str) -> Result<KeyPair, NodeError> {
    let bytes = hex::decode(s.trim()).map_err(|e| NodeError::Config(format!("key seed: {e}")))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::Config("key seed must be 32 bytes".into()))?;
    Ok(keypair_from_seed(&seed))
}

fn load_or_create(path: &Path) -> Result<KeyPair, NodeError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let keys = keys_from_hex(&content)?;
        tracing::info!(path = %path.display(), public_key = %keys.public, "loaded node key");
        return Ok(keys);
    }
    let keys = generate_keypair();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, hex::encode(keys.private.0))?;
    tracing::info!(path = %path.display(), public_key = %keys.public, "generated node key");
    Ok(keys)
}

/// What this node tells the network about itself.
pub fn node_info(config: &NodeConfig, keys: &KeyPair) -> Result<NodeInfo, NodeError> {
    Ok(NodeInfo {
        public_key: keys.public,
        curve_public_key: curve_public_key(&keys.public)?,
        external_ip: config.external_ip.clone(),
        external_port: config.external_port,
        internal_ip: config.internal_ip.clone(),
        internal_port: config.internal_port,
    })
}

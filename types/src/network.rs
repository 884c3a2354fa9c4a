//! Network identifier.

use serde::{Deserialize, Serialize};

/// Identifies which Shoal network a node participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development network.
    Dev,
}

impl NetworkId {
    /// Default external port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Live => 9001,
            Self::Test => 19001,
            Self::Dev => 29001,
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::Dev
    }
}

//! Cycle parameters: every protocol tunable a node needs to build records.
//!
//! Every node on a network must run with identical values, otherwise their
//! records diverge. Operators set them through the `[cycle]` table of the
//! node configuration file.

use serde::{Deserialize, Serialize};

/// Which admission protocol feeds `joinedConsensors`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    /// Requests are digested directly, capped per cycle.
    V1,
    /// Requests wait in the standby list and are selected at Q2.
    V2,
}

/// All cycle and membership parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleParams {
    // ── Cycle timing ─────────────────────────────────────────────────────
    /// Length of one cycle in seconds. Each quarter is a fourth of this.
    pub cycle_duration: u64,

    // ── Network size ─────────────────────────────────────────────────────
    /// Active node count the network considers healthy.
    pub min_nodes: u32,
    /// Upper bound for `desired`.
    pub max_nodes: u32,

    // ── Autoscaling ──────────────────────────────────────────────────────
    /// Votes of one direction needed within a cycle to change `desired`.
    pub scale_reqs_needed: u32,
    pub amount_to_grow: u32,
    pub amount_to_shrink: u32,

    // ── Per-cycle caps ───────────────────────────────────────────────────
    pub max_joined_per_cycle: u32,
    pub max_activated_per_cycle: u32,
    pub max_rotated_per_cycle: u32,

    // ── Gossip ───────────────────────────────────────────────────────────
    /// Number of random active peers each gossip is forwarded to.
    pub gossip_factor: usize,
    /// Identical answers required before a query result is trusted.
    pub redundancy: usize,

    // ── Mode thresholds (fractions of `min_nodes`) ───────────────────────
    pub safety_fraction: f64,
    pub recovery_fraction: f64,
    pub shutdown_fraction: f64,

    // ── Admission capacity (calculateToAcceptV2) ─────────────────────────
    /// In processing mode, growth per cycle is capped at this share of active.
    pub processing_add_fraction: f64,
    /// In processing mode, shrinkage per cycle is capped at this share of active.
    pub processing_remove_fraction: f64,
    /// In safety mode the network aims for `min_nodes` times this overshoot.
    pub safety_overshoot: f64,
    /// In safety mode, growth per cycle is capped at this share of active.
    pub safety_add_fraction: f64,
    /// In recovery mode, growth per cycle is capped at this share of the
    /// active plus syncing total.
    pub recovery_add_fraction: f64,

    // ── Join ─────────────────────────────────────────────────────────────
    pub join_strategy: JoinStrategy,
    /// Standby entries not refreshed for this many cycles expire.
    pub standby_list_cycles_ttl: u64,
    /// Joined nodes that have not finished syncing after this many cycles
    /// are removed.
    pub max_syncing_cycles: u64,

    // ── Lost detection ───────────────────────────────────────────────────
    /// Distinct reporters needed before a node is recorded as lost.
    pub lost_reports_needed: u32,
}

impl CycleParams {
    /// Milliseconds in one quarter.
    pub fn quarter_ms(&self) -> u64 {
        self.cycle_duration.saturating_mul(1000) / 4
    }

    /// Parameters tuned for a local development network: short cycles and a
    /// small minimum size.
    pub fn dev_defaults() -> Self {
        Self {
            cycle_duration: 16,
            min_nodes: 3,
            max_nodes: 20,
            scale_reqs_needed: 2,
            ..Self::default()
        }
    }
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            cycle_duration: 60,

            min_nodes: 15,
            max_nodes: 110,

            scale_reqs_needed: 5,
            amount_to_grow: 1,
            amount_to_shrink: 1,

            max_joined_per_cycle: 10,
            max_activated_per_cycle: 10,
            max_rotated_per_cycle: 1,

            gossip_factor: 4,
            redundancy: 3,

            safety_fraction: 0.9,
            recovery_fraction: 0.5,
            shutdown_fraction: 0.3,

            processing_add_fraction: 0.1,
            processing_remove_fraction: 0.05,
            safety_overshoot: 1.02,
            safety_add_fraction: 0.05,
            recovery_add_fraction: 0.62,

            join_strategy: JoinStrategy::V2,
            standby_list_cycles_ttl: 10,
            max_syncing_cycles: 10,

            lost_reports_needed: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_is_fourth_of_cycle() {
        let p = CycleParams {
            cycle_duration: 60,
            ..Default::default()
        };
        assert_eq!(p.quarter_ms(), 15_000);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let p: CycleParams = serde_json::from_str(r#"{"min_nodes": 5}"#).unwrap();
        assert_eq!(p.min_nodes, 5);
        assert_eq!(p.recovery_add_fraction, 0.62);
        assert_eq!(p.join_strategy, JoinStrategy::V2);
    }
}

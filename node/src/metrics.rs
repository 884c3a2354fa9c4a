//! Prometheus metrics for the Shoal node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`] that the `/metrics` route
//! encodes into the Prometheus text exposition format.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use shoal_consensus::NodeList;

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Records appended to the local chain.
    pub cycles_digested: IntCounter,
    /// Gossip envelopes received on `/gossip`.
    pub gossip_received: IntCounter,
    /// Gossip envelopes applied and passed on.
    pub gossip_forwarded: IntCounter,
    /// Gossip envelopes dropped, by reason.
    pub gossip_dropped: IntCounterVec,
    /// `POST /join` requests received, by outcome.
    pub join_requests: IntCounterVec,
    /// Robust queries that settled for a non-robust answer.
    pub robust_fallbacks: IntCounter,
    /// Apoptosis proposals made by this node.
    pub apoptosis: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub active_nodes: IntGauge,
    pub syncing_nodes: IntGauge,
    pub standby_nodes: IntGauge,
    /// Counter of the cycle in progress.
    pub cycle_counter: IntGauge,
}

impl NodeMetrics {
    /// Create a fresh set of metrics under a new [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_digested = register_int_counter_with_registry!(
            Opts::new("shoal_cycles_digested_total", "Cycle records digested"),
            registry
        )?;
        let gossip_received = register_int_counter_with_registry!(
            Opts::new("shoal_gossip_received_total", "Gossip envelopes received"),
            registry
        )?;
        let gossip_forwarded = register_int_counter_with_registry!(
            Opts::new("shoal_gossip_forwarded_total", "Gossip envelopes applied and forwarded"),
            registry
        )?;
        let gossip_dropped = register_int_counter_vec_with_registry!(
            Opts::new("shoal_gossip_dropped_total", "Gossip envelopes dropped"),
            &["reason"],
            registry
        )?;
        let join_requests = register_int_counter_vec_with_registry!(
            Opts::new("shoal_join_requests_total", "Join requests received"),
            &["outcome"],
            registry
        )?;
        let robust_fallbacks = register_int_counter_with_registry!(
            Opts::new(
                "shoal_robust_query_fallbacks_total",
                "Robust queries answered without reaching redundancy"
            ),
            registry
        )?;
        let apoptosis = register_int_counter_with_registry!(
            Opts::new("shoal_apoptosis_total", "Apoptosis proposals made by this node"),
            registry
        )?;

        let active_nodes = register_int_gauge_with_registry!(
            Opts::new("shoal_active_nodes", "Active nodes in the node list"),
            registry
        )?;
        let syncing_nodes = register_int_gauge_with_registry!(
            Opts::new("shoal_syncing_nodes", "Joined nodes not yet active"),
            registry
        )?;
        let standby_nodes = register_int_gauge_with_registry!(
            Opts::new("shoal_standby_nodes", "Candidates on the standby list"),
            registry
        )?;
        let cycle_counter = register_int_gauge_with_registry!(
            Opts::new("shoal_cycle_counter", "Counter of the cycle in progress"),
            registry
        )?;

        Ok(Self {
            registry,
            cycles_digested,
            gossip_received,
            gossip_forwarded,
            gossip_dropped,
            join_requests,
            robust_fallbacks,
            apoptosis,
            active_nodes,
            syncing_nodes,
            standby_nodes,
            cycle_counter,
        })
    }

    /// Refresh the gauges from the engine's current state.
    pub fn observe(&self, nodes: &NodeList, standby: usize, counter: u64) {
        self.active_nodes.set(nodes.active_count() as i64);
        self.syncing_nodes.set(nodes.syncing_count() as i64);
        self.standby_nodes.set(standby as i64);
        self.cycle_counter.set(counter as i64);
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_counters_and_labels() {
        let m = NodeMetrics::new().unwrap();
        m.cycles_digested.inc_by(3);
        m.gossip_dropped.with_label_values(&["duplicate"]).inc();
        m.observe(&NodeList::new(), 2, 7);

        let text = m.encode().unwrap();
        assert!(text.contains("shoal_cycles_digested_total 3"));
        assert!(text.contains("shoal_gossip_dropped_total{reason=\"duplicate\"} 1"));
        assert!(text.contains("shoal_standby_nodes 2"));
        assert!(text.contains("shoal_cycle_counter 7"));
    }

    #[test]
    fn separate_instances_do_not_collide() {
        let a = NodeMetrics::new().unwrap();
        let b = NodeMetrics::new().unwrap();
        a.apoptosis.inc();
        assert_eq!(b.apoptosis.get(), 0);
    }
}

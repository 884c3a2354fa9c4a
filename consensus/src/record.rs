//! Record assembly.
//!
//! A record is built at Q3 from the transactions every submodule collected
//! and the read-only engine context. Nothing else is read, so honest nodes
//! that saw the same transactions build byte-identical records.

use shoal_types::{
    Archiver, CycleMarker, CycleParams, CycleRecord, Hash256, JoinStrategy, NetworkId, NodeInfo,
    TxListEntry,
};

use crate::archivers::ArchiverList;
use crate::chain::marker_of;
use crate::error::ConsensusError;
use crate::join::joined_consensor;
use crate::nodelist::{list_hash, NodeList};
use crate::submodule::{CycleContext, CycleTxs};
use crate::submodules::Submodules;

/// A freshly built record.
#[derive(Clone, Debug)]
pub struct BuiltRecord {
    pub record: CycleRecord,
    pub marker: CycleMarker,
    /// Submodules whose fields kept their defaults because they failed.
    pub failed: Vec<&'static str>,
}

/// Collect every submodule's transactions, in registration order.
pub fn collect_txs(subs: &Submodules) -> CycleTxs {
    let mut txs = CycleTxs::default();
    for sub in subs.all() {
        sub.get_txs(&mut txs);
    }
    txs
}

/// Fill the counts and `nodeListHash` from the node list the record leads to.
pub fn finalize_counts(
    record: &mut CycleRecord,
    subs: &Submodules,
    nodes: &NodeList,
) -> Result<(), ConsensusError> {
    let mut next = nodes.clone();
    next.apply(&subs.parse(record));
    record.active = next.active_count() as u32;
    record.syncing = next.syncing_count() as u32;
    record.node_list_hash = next.hash()?;
    Ok(())
}

/// Build the record for `ctx.counter` starting at `start` seconds.
pub fn build_record(
    subs: &Submodules,
    ctx: &CycleContext<'_>,
    start: u64,
) -> Result<BuiltRecord, ConsensusError> {
    let prev = ctx.prev;
    let mut record = CycleRecord::skeleton(
        ctx.network_id,
        ctx.counter,
        ctx.prev_marker.unwrap_or(Hash256::ZERO),
        start,
        ctx.params.cycle_duration,
    );
    if let Some(prev) = prev {
        record.mode = prev.mode;
        record.desired = prev.desired;
        record.standby = prev.standby;
        record.standby_node_list_hash = prev.standby_node_list_hash;
    }

    let txs = collect_txs(subs);
    let mut failed = Vec::new();
    for sub in subs.all() {
        let snapshot = record.clone();
        if let Err(e) = sub.update_record(&txs, &mut record, prev, ctx) {
            tracing::warn!(submodule = sub.name(), counter = ctx.counter, error = %e, "update_record failed");
            record = snapshot;
            failed.push(sub.name());
        }
    }

    record.normalize();
    finalize_counts(&mut record, subs, ctx.nodes)?;
    let marker = marker_of(&record)?;
    tracing::debug!(
        counter = record.counter,
        marker = %marker,
        mode = %record.mode,
        active = record.active,
        syncing = record.syncing,
        joined = record.joined_consensors.len(),
        removed = record.removed.len(),
        "built cycle record"
    );
    Ok(BuiltRecord {
        record,
        marker,
        failed,
    })
}

/// Record 0 of a new network: the first node joins and is active at once.
pub fn bootstrap_first(
    params: &CycleParams,
    network_id: NetworkId,
    subs: &Submodules,
    info: &NodeInfo,
    join_request_timestamp: u64,
    archivers: Vec<Archiver>,
    start: u64,
) -> Result<BuiltRecord, ConsensusError> {
    let mut record = CycleRecord::skeleton(network_id, 0, Hash256::ZERO, start, params.cycle_duration);
    record.desired = params.min_nodes;

    let jc = joined_consensor(info, join_request_timestamp, &record);
    record.activated = vec![jc.id];
    record.activated_public_keys = vec![info.public_key];
    record.joined_consensors = vec![jc];

    record.archiver_list_hash = ArchiverList::from_archivers(archivers.iter().cloned()).hash()?;
    record.joined_archivers = archivers;
    record.txlisthash = list_hash::<TxListEntry>(&[])?;
    if subs.join.strategy() == JoinStrategy::V2 {
        record.standby_node_list_hash = subs.join.standby_hash()?;
    }

    record.normalize();
    finalize_counts(&mut record, subs, &NodeList::new())?;
    let marker = marker_of(&record)?;
    tracing::info!(marker = %marker, network = ?network_id, "created first cycle record");
    Ok(BuiltRecord {
        record,
        marker,
        failed: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::tests::{candidate, join_request};
    use shoal_types::{NetworkMode, NodeStatus};

    fn ctx<'a>(
        params: &'a CycleParams,
        nodes: &'a NodeList,
        archivers: &'a ArchiverList,
        prev: &'a CycleRecord,
        marker: CycleMarker,
    ) -> CycleContext<'a> {
        CycleContext {
            params,
            network_id: NetworkId::Dev,
            nodes,
            archivers,
            prev: Some(prev),
            prev_marker: Some(marker),
            counter: prev.counter + 1,
            quarter: None,
            self_id: None,
        }
    }

    fn first(subs: &Submodules, params: &CycleParams) -> BuiltRecord {
        let kp = candidate(1);
        let info = join_request(&kp, Hash256::ZERO).body.node_info;
        bootstrap_first(params, NetworkId::Dev, subs, &info, 5, Vec::new(), 1_000).unwrap()
    }

    #[test]
    fn first_record_activates_the_seed_node() {
        let params = CycleParams::default();
        let subs = Submodules::new(JoinStrategy::V2);
        let built = first(&subs, &params);
        let r = &built.record;
        assert_eq!(r.counter, 0);
        assert_eq!(r.previous, Hash256::ZERO);
        assert_eq!(r.mode, NetworkMode::Forming);
        assert_eq!(r.desired, params.min_nodes);
        assert_eq!(r.active, 1);
        assert_eq!(r.syncing, 0);

        let mut nodes = NodeList::new();
        nodes.apply(&subs.parse(r));
        let node = nodes.get(&r.joined_consensors[0].id).unwrap();
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(r.node_list_hash, nodes.hash().unwrap());
    }

    #[test]
    fn equal_inputs_build_equal_records() {
        let params = CycleParams::default();
        let subs = Submodules::new(JoinStrategy::V2);
        let genesis = first(&subs, &params);
        let mut nodes = NodeList::new();
        nodes.apply(&subs.parse(&genesis.record));
        let archivers = ArchiverList::new();

        let ctx = ctx(&params, &nodes, &archivers, &genesis.record, genesis.marker);
        let a = build_record(&subs, &ctx, 1_060).unwrap();
        let b = build_record(&subs, &ctx, 1_060).unwrap();
        assert_eq!(a.record, b.record);
        assert_eq!(a.marker, b.marker);
        assert!(a.failed.is_empty());
        assert_eq!(a.record.previous, genesis.marker);
        assert_eq!(a.record.counter, 1);
        assert!(a.record.is_normalized());
    }
}

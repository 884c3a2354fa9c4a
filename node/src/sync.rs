//! Bringing a joined node up to date with the network.
//!
//! Both strategies end in a [`Snapshot`] that the engine installs after
//! checking it against the newest record's hashes.
//!
//! - [`sync_v1`] agrees on the newest record, then walks the chain backwards
//!   and rebuilds the node list by squashing each record's changes.
//! - [`crate::sync_v2::sync_v2`] agrees on the hash of every list and
//!   downloads the lists themselves.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

use shoal_consensus::{list_hash, marker_of, ChangeSquasher, CycleChain, NodeList, Submodules};
use shoal_messages::{routes, HashResponse, NewestCycleResponse, SyncCyclesRequest};
use shoal_network::{fetch, post, robust_query, NetworkError, PeerAddr, RobustQueryResult};
use shoal_types::{
    Archiver, CycleMarker, CycleRecord, Hash256, JoinStrategy, Node, StandbyInfo, TxListEntry,
};

use crate::api::MAX_CYCLES_PER_REQUEST;
use crate::config::SyncStrategy;
use crate::handle::NodeHandle;
use crate::tracing_spans::sync_span;
use crate::NodeError;

/// Everything a node needs to start following the network.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Oldest first; the last one is the newest record.
    pub records: Vec<CycleRecord>,
    pub nodes: Vec<Node>,
    pub archivers: Vec<Archiver>,
    pub standby: Vec<StandbyInfo>,
    pub tx_list: Vec<TxListEntry>,
}

impl Snapshot {
    pub fn newest(&self) -> Option<&CycleRecord> {
        self.records.last()
    }
}

/// Run the configured strategy against `peers`.
pub async fn run(handle: &NodeHandle, peers: &[PeerAddr]) -> Result<Snapshot, NodeError> {
    let strategy = handle.config.sync_strategy;
    let label = match strategy {
        SyncStrategy::V1 => "v1",
        SyncStrategy::V2 => "v2",
    };
    async {
        let snapshot = match strategy {
            SyncStrategy::V1 => sync_v1(handle, peers).await?,
            SyncStrategy::V2 => crate::sync_v2::sync_v2(handle, peers).await?,
        };
        if let Some(newest) = snapshot.newest() {
            tracing::info!(
                counter = newest.counter,
                records = snapshot.records.len(),
                nodes = snapshot.nodes.len(),
                "sync complete"
            );
        }
        Ok(snapshot)
    }
    .instrument(sync_span(label))
    .await
}

/// Robust query for a `GET` route, counting a fallback when no quorum formed.
pub(crate) async fn robust_get<R>(
    handle: &NodeHandle,
    peers: &[PeerAddr],
    path: &str,
) -> Result<RobustQueryResult<PeerAddr, R>, NodeError>
where
    R: DeserializeOwned + PartialEq,
{
    let transport = handle.transport();
    let result = robust_query(
        peers,
        |peer: PeerAddr| async move { fetch::<R>(transport, &peer, path).await },
        |a: &R, b: &R| a == b,
        handle.config.cycle.redundancy,
    )
    .await?;
    note_fallback(handle, path, &result);
    Ok(result)
}

pub(crate) fn note_fallback<R>(handle: &NodeHandle, what: &str, result: &RobustQueryResult<PeerAddr, R>) {
    if !result.is_robust_result {
        handle.metrics.robust_fallbacks.inc();
        tracing::warn!(query = what, agreeing = result.count(), "no quorum, using best answer");
    }
}

/// Fetch from the first of `winners` that answers.
pub(crate) async fn fetch_from_any<T: DeserializeOwned>(
    handle: &NodeHandle,
    winners: &[PeerAddr],
    path: &str,
) -> Result<T, NodeError> {
    let mut last = NetworkError::NoResponses;
    for peer in winners {
        match fetch::<T>(handle.transport(), peer, path).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(peer = %peer, path, error = %e, "fetch failed, trying next");
                last = e;
            }
        }
    }
    Err(last.into())
}

/// Active nodes as reported by the seeds, checked against the hash the
/// seeds agree on.
pub async fn discover_peers(handle: &NodeHandle, seeds: &[PeerAddr]) -> Result<Vec<PeerAddr>, NodeError> {
    let agreed: RobustQueryResult<PeerAddr, HashResponse> =
        robust_get(handle, seeds, routes::HTTP_VALIDATOR_LIST_HASH).await?;
    let nodes: Vec<Node> =
        fetch_from_any(handle, &agreed.winning_nodes, routes::HTTP_VALIDATOR_LIST).await?;
    if NodeList::from_nodes(nodes.clone()).hash()? != agreed.top_result.hash {
        return Err(NodeError::Sync("validator list does not match its agreed hash".into()));
    }
    let peers: Vec<PeerAddr> = nodes
        .iter()
        .filter(|n| n.is_active() && n.public_key() != &handle.keys.public)
        .map(PeerAddr::from)
        .collect();
    if peers.is_empty() {
        return Err(NodeError::Sync("seeds know no active nodes".into()));
    }
    Ok(peers)
}

/// Newest record, agreed on by marker.
pub(crate) async fn robust_newest(
    handle: &NodeHandle,
    peers: &[PeerAddr],
) -> Result<(CycleRecord, Vec<PeerAddr>), NodeError> {
    let transport = handle.transport();
    let result = robust_query(
        peers,
        |peer: PeerAddr| async move {
            let resp: NewestCycleResponse =
                fetch(transport, &peer, routes::HTTP_SYNC_NEWEST_CYCLE).await?;
            let record = resp.newest_cycle.ok_or(NetworkError::NoResponses)?;
            let marker = marker_of(&record)?;
            Ok::<(CycleMarker, CycleRecord), NetworkError>((marker, record))
        },
        |a: &(CycleMarker, CycleRecord), b: &(CycleMarker, CycleRecord)| a.0 == b.0,
        handle.config.cycle.redundancy,
    )
    .await?;
    note_fallback(handle, routes::HTTP_SYNC_NEWEST_CYCLE, &result);
    Ok((result.top_result.1, result.winning_nodes))
}

/// Chain walk from the newest record back until the squashed changes
/// account for every node the newest record counts.
pub async fn sync_v1(handle: &NodeHandle, peers: &[PeerAddr]) -> Result<Snapshot, NodeError> {
    let subs = Submodules::new(handle.config.cycle.join_strategy);
    let (newest, winners) = robust_newest(handle, peers).await?;
    let want_active = newest.active as usize;
    let want_total = (newest.active + newest.syncing) as usize;

    let mut chain = CycleChain::with_retention(handle.config.retained_records);
    let mut squasher = ChangeSquasher::new();
    squasher.add_change(&subs.parse(&newest));
    chain.prepend(newest.clone())?;

    while !squasher.covers(want_active, want_total) {
        let oldest = chain.oldest().map_or(0, |e| e.record.counter);
        if oldest == 0 {
            break;
        }
        let end = oldest - 1;
        let start = end.saturating_sub(MAX_CYCLES_PER_REQUEST - 1);
        let batch = fetch_records(handle, &winners, &subs, start, end).await?;
        if batch.is_empty() {
            return Err(NodeError::Sync(format!("peers hold no records before {oldest}")));
        }
        for record in batch.into_iter().rev() {
            squasher.add_change(&subs.parse(&record));
            chain.prepend(record)?;
            if squasher.covers(want_active, want_total) {
                break;
            }
        }
        tracing::debug!(
            oldest = chain.oldest().map_or(0, |e| e.record.counter),
            active = squasher.active(),
            total = squasher.total(),
            "walked back"
        );
    }

    let nodes = squasher.nodes();
    if NodeList::from_nodes(nodes.clone()).hash()? != newest.node_list_hash {
        return Err(NodeError::Sync("squashed node list does not match the newest record".into()));
    }

    let archivers: Vec<Archiver> = fetch_from_any(handle, &winners, routes::HTTP_ARCHIVER_LIST).await?;
    let standby = match handle.config.cycle.join_strategy {
        JoinStrategy::V2 => fetch_standby(handle, &winners, newest.standby_node_list_hash).await?,
        JoinStrategy::V1 => Vec::new(),
    };
    let tx_list: Vec<TxListEntry> = fetch_from_any(handle, &winners, routes::HTTP_TX_LIST).await?;

    Ok(Snapshot {
        records: chain.range(0, u64::MAX),
        nodes,
        archivers,
        standby,
        tx_list,
    })
}

/// The standby list from the first winner whose copy hashes to `agreed`.
async fn fetch_standby(
    handle: &NodeHandle,
    winners: &[PeerAddr],
    agreed: Hash256,
) -> Result<Vec<StandbyInfo>, NodeError> {
    for peer in winners {
        match fetch::<Vec<StandbyInfo>>(handle.transport(), peer, routes::HTTP_STANDBY_LIST).await {
            Ok(list) if list_hash(&list)? == agreed => return Ok(list),
            Ok(list) => tracing::warn!(
                peer = %peer,
                entries = list.len(),
                "standby list does not match the newest record"
            ),
            Err(e) => tracing::debug!(peer = %peer, error = %e, "standby fetch failed, trying next"),
        }
    }
    Err(NodeError::Sync("no peer served the agreed standby list".into()))
}

/// Records `start..=end` from the first winner that serves them, each
/// schema-checked before decoding.
async fn fetch_records(
    handle: &NodeHandle,
    winners: &[PeerAddr],
    subs: &Submodules,
    start: u64,
    end: u64,
) -> Result<Vec<CycleRecord>, NodeError> {
    let range = SyncCyclesRequest { start, end };
    let mut last = NodeError::Sync("no peer served the records".into());
    for peer in winners {
        let values: Vec<Value> = match post(handle.transport(), peer, routes::HTTP_SYNC_CYCLES, &range).await {
            Ok(v) => v,
            Err(e) => {
                last = e.into();
                continue;
            }
        };
        let decoded: Result<Vec<CycleRecord>, NodeError> = values
            .iter()
            .map(|v| {
                subs.validate_record_types(v)
                    .map_err(|e| NodeError::Sync(e.to_string()))?;
                serde_json::from_value(v.clone()).map_err(|e| NodeError::Sync(e.to_string()))
            })
            .collect();
        match decoded {
            Ok(records) => return Ok(records),
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "peer served malformed records");
                last = e;
            }
        }
    }
    Err(last)
}

/// Hash check shared by list downloads.
pub(crate) fn check_hash(what: &str, actual: Hash256, agreed: Hash256) -> Result<(), NodeError> {
    if actual != agreed {
        return Err(NodeError::Sync(format!(
            "{what} hash {actual} does not match agreed {agreed}"
        )));
    }
    Ok(())
}

//! List sync: agree on hashes, then download and re-verify the lists.

use shoal_consensus::{list_hash, marker_of, ArchiverList, NodeList};
use shoal_messages::{routes, HashResponse, NewestCycleResponse};
use shoal_network::{PeerAddr, RobustQueryResult};
use shoal_types::{Archiver, Node, StandbyInfo, TxListEntry};

use crate::handle::NodeHandle;
use crate::sync::{check_hash, fetch_from_any, robust_get, Snapshot};
use crate::NodeError;

type Agreed = RobustQueryResult<PeerAddr, HashResponse>;

pub async fn sync_v2(handle: &NodeHandle, peers: &[PeerAddr]) -> Result<Snapshot, NodeError> {
    let validators: Agreed = robust_get(handle, peers, routes::HTTP_VALIDATOR_LIST_HASH).await?;
    let archivers: Agreed = robust_get(handle, peers, routes::HTTP_ARCHIVER_LIST_HASH).await?;
    let cycle: Agreed = robust_get(handle, peers, routes::HTTP_CURRENT_CYCLE_HASH).await?;
    let standby: Agreed = robust_get(handle, peers, routes::HTTP_STANDBY_LIST_HASH).await?;
    let txs: Agreed = robust_get(handle, peers, routes::HTTP_TX_LIST_HASH).await?;

    let nodes: Vec<Node> =
        fetch_from_any(handle, &validators.winning_nodes, routes::HTTP_VALIDATOR_LIST).await?;
    check_hash(
        "validator list",
        NodeList::from_nodes(nodes.clone()).hash()?,
        validators.top_result.hash,
    )?;

    let archiver_list: Vec<Archiver> =
        fetch_from_any(handle, &archivers.winning_nodes, routes::HTTP_ARCHIVER_LIST).await?;
    check_hash(
        "archiver list",
        ArchiverList::from_archivers(archiver_list.clone()).hash()?,
        archivers.top_result.hash,
    )?;

    let newest: NewestCycleResponse =
        fetch_from_any(handle, &cycle.winning_nodes, routes::HTTP_SYNC_NEWEST_CYCLE).await?;
    let record = newest
        .newest_cycle
        .ok_or_else(|| NodeError::Sync("peer has no cycle record".into()))?;
    check_hash("newest cycle", marker_of(&record)?, cycle.top_result.hash)?;
    check_hash("record nodeListHash", record.node_list_hash, validators.top_result.hash)?;
    check_hash(
        "record archiverListHash",
        record.archiver_list_hash,
        archivers.top_result.hash,
    )?;

    let standby_list: Vec<StandbyInfo> =
        fetch_from_any(handle, &standby.winning_nodes, routes::HTTP_STANDBY_LIST).await?;
    check_hash("standby list", list_hash(&standby_list)?, standby.top_result.hash)?;

    let tx_list: Vec<TxListEntry> =
        fetch_from_any(handle, &txs.winning_nodes, routes::HTTP_TX_LIST).await?;
    check_hash("tx list", list_hash(&tx_list)?, txs.top_result.hash)?;

    tracing::debug!(
        counter = record.counter,
        nodes = nodes.len(),
        archivers = archiver_list.len(),
        standby = standby_list.len(),
        txs = tx_list.len(),
        "lists verified"
    );
    Ok(Snapshot {
        records: vec![record],
        nodes,
        archivers: archiver_list,
        standby: standby_list,
        tx_list,
    })
}

use proptest::prelude::*;
use std::collections::HashSet;

use shoal_consensus::{Change, ChangeSquasher, NodeList, NodeUpdate};
use shoal_types::{
    CurvePublicKey, CycleRecord, Hash256, NetworkId, Node, NodeId, NodeInfo, NodeStatus, PublicKey,
};

fn node(b: u8, join_ts: u64) -> Node {
    Node {
        id: Hash256::new([b; 32]),
        info: NodeInfo {
            public_key: PublicKey([b; 32]),
            curve_public_key: CurvePublicKey([b; 32]),
            external_ip: format!("10.0.{}.{}", b / 100, b % 100),
            external_port: 9001,
            internal_ip: "127.0.0.1".into(),
            internal_port: 10001,
        },
        status: NodeStatus::Syncing,
        join_request_timestamp: join_ts,
        active_timestamp: 0,
        cycle_joined: Hash256::ZERO,
        counter_joined: 0,
    }
}

fn status(n: u8) -> NodeStatus {
    match n % 3 {
        0 => NodeStatus::Syncing,
        1 => NodeStatus::Ready,
        _ => NodeStatus::Active,
    }
}

/// Turn raw op tuples into a well-formed sequence of record changes: ids are
/// never reused and each id is updated at most once per change.
fn changes_from(ops: &[Vec<(u8, u8, u8)>]) -> Vec<Change> {
    let mut live: Vec<NodeId> = Vec::new();
    let mut next = 1u8;
    let mut out = Vec::new();
    for (cycle, batch) in ops.iter().enumerate() {
        let mut change = Change::default();
        let mut touched = HashSet::new();
        for &(kind, pick, st) in batch {
            match kind % 3 {
                0 if next < 250 => {
                    let n = node(next, (cycle as u64) * 10 + u64::from(pick % 10));
                    live.push(n.id);
                    change.added.push(n);
                    next += 1;
                }
                1 if !live.is_empty() => {
                    let id = live[pick as usize % live.len()];
                    if touched.insert(id) {
                        change.updated.push(NodeUpdate {
                            id,
                            status: status(st),
                            active_timestamp: Some(cycle as u64),
                        });
                    }
                }
                2 if !live.is_empty() => {
                    let id = live.remove(pick as usize % live.len());
                    change.removed.push(id);
                }
                _ => {}
            }
        }
        out.push(change);
    }
    out
}

fn ops_strategy() -> impl Strategy<Value = Vec<Vec<(u8, u8, u8)>>> {
    prop::collection::vec(prop::collection::vec(any::<(u8, u8, u8)>(), 0..12), 1..12)
}

proptest! {
    /// Every view of the node list stays consistent under any change sequence.
    #[test]
    fn node_list_views_stay_consistent(ops in ops_strategy()) {
        let mut list = NodeList::new();
        for change in changes_from(&ops) {
            list.apply(&change);
            prop_assert!(list.check_invariants());
        }
        prop_assert_eq!(list.active_ids().len(), list.active_count());
    }

    /// Folding changes newest-first reconstructs the list built oldest-first.
    #[test]
    fn squashing_matches_forward_application(ops in ops_strategy()) {
        let changes = changes_from(&ops);
        let mut forward = NodeList::new();
        for change in &changes {
            forward.apply(change);
        }
        let mut squasher = ChangeSquasher::new();
        for change in changes.iter().rev() {
            squasher.add_change(change);
        }
        let expected: Vec<Node> = forward.by_id_order().cloned().collect();
        prop_assert_eq!(squasher.nodes(), expected);
        prop_assert!(squasher.covers(forward.active_count(), forward.len()));
    }

    /// The ring successor of an active id is a different active node.
    #[test]
    fn ring_successor_skips_the_key(ops in ops_strategy(), probe in any::<[u8; 32]>()) {
        let mut list = NodeList::new();
        for change in changes_from(&ops) {
            list.apply(&change);
        }
        let ids = list.active_ids().to_vec();
        for id in &ids {
            let next = list.ring_successor(id);
            if ids.len() > 1 {
                let next = next.map(|n| n.id);
                prop_assert!(next.is_some() && next != Some(*id));
            }
        }
        if let Some(n) = list.ring_successor(&Hash256::new(probe)) {
            prop_assert!(n.is_active());
        }
    }

    /// Normalizing a record is idempotent and leaves its lists sorted.
    #[test]
    fn normalize_is_idempotent(
        removed in prop::collection::vec(any::<[u8; 32]>(), 0..20),
        lost in prop::collection::vec(any::<[u8; 32]>(), 0..20),
    ) {
        let mut record = CycleRecord::skeleton(NetworkId::Dev, 3, Hash256::ZERO, 0, 60);
        record.removed = removed.into_iter().map(Hash256::new).collect();
        record.lost = lost.into_iter().map(Hash256::new).collect();
        record.normalize();
        prop_assert!(record.is_normalized());
        prop_assert!(record.removed.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(record.lost.windows(2).all(|w| w[0] < w[1]));
    }
}

//! Node list — the authoritative in-memory membership table.
//!
//! Six views are kept in step on every mutation:
//!
//! - `by_id`, `by_pubkey`, `by_ip_port`: hash indexes
//! - `by_join_order`: sorted by `(joinRequestTimestamp, id)`
//! - `by_id_order`: every node id, sorted
//! - `active_by_id_order`: ids of active nodes, sorted; a subset of `by_id_order`
//!
//! Ordered views are maintained with binary-search insert and splice. They
//! are read on every gossip fan-out and never re-sorted.

use serde::Serialize;
use shoal_crypto::CryptoError;
use shoal_types::{Hash256, Node, NodeId, NodeStatus, PublicKey};
use shoal_utils::{insert_sorted, remove_sorted};
use std::collections::HashMap;

/// A status change produced by digesting a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeUpdate {
    pub id: NodeId,
    pub status: NodeStatus,
    /// Set when the node becomes active.
    pub active_timestamp: Option<u64>,
}

/// Node-list mutations a record implies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Change {
    pub added: Vec<Node>,
    pub removed: Vec<NodeId>,
    pub updated: Vec<NodeUpdate>,
}

impl Change {
    pub fn merge(&mut self, other: Change) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.updated.extend(other.updated);
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeList {
    by_id: HashMap<NodeId, Node>,
    by_pubkey: HashMap<PublicKey, NodeId>,
    by_ip_port: HashMap<String, NodeId>,
    by_join_order: Vec<(u64, NodeId)>,
    by_id_order: Vec<NodeId>,
    active_by_id_order: Vec<NodeId>,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut list = Self::new();
        for node in nodes {
            list.add_node(node);
        }
        list
    }

    /// Insert a node into every view. A node whose id, public key or
    /// external address is already present is left out and `false` is
    /// returned.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.by_id.contains_key(&node.id) {
            tracing::warn!(id = %node.id, "add_node: id already in node list");
            return false;
        }
        if let Some(holder) = self.by_pubkey.get(&node.info.public_key) {
            tracing::warn!(id = %node.id, %holder, "add_node: public key already in node list");
            return false;
        }
        let addr = node.info.external_addr();
        if let Some(holder) = self.by_ip_port.get(&addr) {
            tracing::warn!(id = %node.id, %holder, %addr, "add_node: address already in node list");
            return false;
        }
        let id = node.id;
        self.by_pubkey.insert(node.info.public_key, id);
        self.by_ip_port.insert(addr, id);
        insert_sorted(
            &mut self.by_join_order,
            (node.join_request_timestamp, id),
            |a, b| a.cmp(b),
        );
        insert_sorted(&mut self.by_id_order, id, |a, b| a.cmp(b));
        if node.is_active() {
            insert_sorted(&mut self.active_by_id_order, id, |a, b| a.cmp(b));
        }
        self.by_id.insert(id, node);
        true
    }

    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let node = self.by_id.remove(id)?;
        self.by_pubkey.remove(&node.info.public_key);
        self.by_ip_port.remove(&node.info.external_addr());
        remove_sorted(
            &mut self.by_join_order,
            &(node.join_request_timestamp, *id),
            |a, b| a.cmp(b),
        );
        remove_sorted(&mut self.by_id_order, id, |a, b| a.cmp(b));
        remove_sorted(&mut self.active_by_id_order, id, |a, b| a.cmp(b));
        Some(node)
    }

    /// Apply a status change. Returns `false` if the node is unknown.
    pub fn update_node(&mut self, update: &NodeUpdate) -> bool {
        let Some(node) = self.by_id.get_mut(&update.id) else {
            tracing::debug!(id = %update.id, "update_node: unknown id");
            return false;
        };
        let was_active = node.is_active();
        node.status = update.status;
        if let Some(ts) = update.active_timestamp {
            node.active_timestamp = ts;
        }
        let is_active = node.is_active();
        if is_active && !was_active {
            insert_sorted(&mut self.active_by_id_order, update.id, |a, b| a.cmp(b));
        } else if was_active && !is_active {
            remove_sorted(&mut self.active_by_id_order, &update.id, |a, b| a.cmp(b));
        }
        true
    }

    /// Apply additions, then status updates, then removals.
    pub fn apply(&mut self, change: &Change) {
        for node in &change.added {
            self.add_node(node.clone());
        }
        for update in &change.updated {
            self.update_node(update);
        }
        for id in &change.removed {
            self.remove_node(id);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.by_id.get(id)
    }

    pub fn get_by_pubkey(&self, pk: &PublicKey) -> Option<&Node> {
        self.by_pubkey.get(pk).and_then(|id| self.by_id.get(id))
    }

    pub fn get_by_ip_port(&self, ip: &str, port: u16) -> Option<&Node> {
        self.by_ip_port
            .get(&format!("{ip}:{port}"))
            .and_then(|id| self.by_id.get(id))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active_by_id_order.len()
    }

    /// Nodes that are in the list but not yet active.
    pub fn syncing_count(&self) -> usize {
        self.len() - self.active_count()
    }

    pub fn is_active(&self, id: &NodeId) -> bool {
        self.get(id).is_some_and(Node::is_active)
    }

    pub fn by_id_order(&self) -> impl Iterator<Item = &Node> + '_ {
        self.by_id_order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn active_by_id_order(&self) -> impl Iterator<Item = &Node> + '_ {
        self.active_by_id_order
            .iter()
            .filter_map(|id| self.by_id.get(id))
    }

    pub fn by_join_order(&self) -> impl Iterator<Item = &Node> + '_ {
        self.by_join_order
            .iter()
            .filter_map(|(_, id)| self.by_id.get(id))
    }

    pub fn active_ids(&self) -> &[NodeId] {
        &self.active_by_id_order
    }

    /// The first active node after `key` in id order, wrapping around.
    /// Used to assign each node (or archiver) a deterministic checker.
    pub fn ring_successor(&self, key: &Hash256) -> Option<&Node> {
        if self.active_by_id_order.is_empty() {
            return None;
        }
        let pos = match self.active_by_id_order.binary_search(key) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        let id = self.active_by_id_order[pos % self.active_by_id_order.len()];
        self.by_id.get(&id)
    }

    /// Hash of every node in id order; `nodeListHash` of a record.
    pub fn hash(&self) -> Result<Hash256, CryptoError> {
        let nodes: Vec<&Node> = self.by_id_order().collect();
        list_hash(&nodes)
    }

    /// Whether every view agrees with `by_id`.
    pub fn check_invariants(&self) -> bool {
        let n = self.by_id.len();
        let sorted_unique = |v: &[NodeId]| v.windows(2).all(|w| w[0] < w[1]);

        self.by_pubkey.len() == n
            && self.by_ip_port.len() == n
            && self.by_join_order.len() == n
            && self.by_id_order.len() == n
            && sorted_unique(&self.by_id_order)
            && sorted_unique(&self.active_by_id_order)
            && self.by_join_order.windows(2).all(|w| w[0] < w[1])
            && self.by_id_order.iter().all(|id| self.by_id.contains_key(id))
            && self.active_by_id_order
                == self
                    .by_id_order
                    .iter()
                    .copied()
                    .filter(|id| self.by_id[id].is_active())
                    .collect::<Vec<_>>()
    }
}

/// Hash of an ordered list, as used for the node, standby, archiver and tx lists.
pub fn list_hash<T: Serialize>(items: &[T]) -> Result<Hash256, CryptoError> {
    shoal_crypto::hash_obj(items)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shoal_types::{CurvePublicKey, NodeInfo};

    pub(crate) fn make_node(b: u8, status: NodeStatus, join_ts: u64) -> Node {
        Node {
            id: Hash256::new([b; 32]),
            info: NodeInfo {
                public_key: PublicKey([b; 32]),
                curve_public_key: CurvePublicKey([b; 32]),
                external_ip: format!("10.0.0.{b}"),
                external_port: 9001,
                internal_ip: format!("10.0.0.{b}"),
                internal_port: 10001,
            },
            status,
            join_request_timestamp: join_ts,
            active_timestamp: 0,
            cycle_joined: Hash256::ZERO,
            counter_joined: 0,
        }
    }

    #[test]
    fn add_populates_every_view() {
        let mut list = NodeList::new();
        assert!(list.add_node(make_node(3, NodeStatus::Active, 30)));
        assert!(list.add_node(make_node(1, NodeStatus::Syncing, 10)));
        assert!(list.add_node(make_node(2, NodeStatus::Active, 5)));

        let ids: Vec<u8> = list.by_id_order().map(|n| n.id.as_bytes()[0]).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let joins: Vec<u8> = list.by_join_order().map(|n| n.id.as_bytes()[0]).collect();
        assert_eq!(joins, vec![2, 1, 3]);
        assert_eq!(list.active_count(), 2);
        assert_eq!(list.get_by_ip_port("10.0.0.1", 9001).unwrap().id, Hash256::new([1; 32]));
        assert!(list.check_invariants());
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let mut list = NodeList::new();
        list.add_node(make_node(1, NodeStatus::Active, 10));
        let before = list.hash().unwrap();

        let mut again = make_node(1, NodeStatus::Syncing, 99);
        again.info.external_port = 1;
        assert!(!list.add_node(again));
        assert_eq!(list.len(), 1);
        assert_eq!(list.hash().unwrap(), before);
        assert!(list.check_invariants());
    }

    #[test]
    fn colliding_key_or_address_is_refused() {
        let mut list = NodeList::from_nodes([make_node(1, NodeStatus::Active, 1)]);

        let mut same_addr = make_node(2, NodeStatus::Syncing, 2);
        same_addr.info.external_ip = "10.0.0.1".into();
        assert!(!list.add_node(same_addr));

        let mut same_key = make_node(3, NodeStatus::Syncing, 3);
        same_key.info.public_key = PublicKey([1; 32]);
        assert!(!list.add_node(same_key));

        assert_eq!(list.len(), 1);
        assert!(list.check_invariants());
        assert!(list.remove_node(&Hash256::new([2; 32])).is_none());
        assert_eq!(
            list.get_by_ip_port("10.0.0.1", 9001).unwrap().id,
            Hash256::new([1; 32])
        );
        assert_eq!(list.get_by_pubkey(&PublicKey([1; 32])).unwrap().id, Hash256::new([1; 32]));
    }

    #[test]
    fn update_moves_between_active_view() {
        let mut list = NodeList::from_nodes([make_node(1, NodeStatus::Syncing, 1)]);
        let id = Hash256::new([1; 32]);
        list.update_node(&NodeUpdate {
            id,
            status: NodeStatus::Active,
            active_timestamp: Some(500),
        });
        assert!(list.is_active(&id));
        assert_eq!(list.get(&id).unwrap().active_timestamp, 500);

        list.update_node(&NodeUpdate {
            id,
            status: NodeStatus::Ready,
            active_timestamp: None,
        });
        assert_eq!(list.active_count(), 0);
        assert!(list.check_invariants());
    }

    #[test]
    fn remove_clears_every_view() {
        let mut list = NodeList::from_nodes([
            make_node(1, NodeStatus::Active, 1),
            make_node(2, NodeStatus::Active, 2),
        ]);
        let removed = list.remove_node(&Hash256::new([1; 32])).unwrap();
        assert_eq!(removed.id, Hash256::new([1; 32]));
        assert!(list.get_by_pubkey(&PublicKey([1; 32])).is_none());
        assert_eq!(list.len(), 1);
        assert!(list.check_invariants());
        assert!(list.remove_node(&Hash256::new([1; 32])).is_none());
    }

    #[test]
    fn ring_successor_wraps() {
        let list = NodeList::from_nodes([
            make_node(10, NodeStatus::Active, 1),
            make_node(20, NodeStatus::Active, 2),
            make_node(15, NodeStatus::Syncing, 3),
        ]);
        let succ = |b: u8| list.ring_successor(&Hash256::new([b; 32])).unwrap().id.as_bytes()[0];
        assert_eq!(succ(10), 20);
        assert_eq!(succ(12), 20);
        assert_eq!(succ(20), 10);
        assert_eq!(succ(25), 10);
    }

    #[test]
    fn apply_adds_updates_then_removes() {
        let mut list = NodeList::from_nodes([make_node(1, NodeStatus::Active, 1)]);
        let change = Change {
            added: vec![make_node(2, NodeStatus::Syncing, 2)],
            removed: vec![Hash256::new([1; 32])],
            updated: vec![NodeUpdate {
                id: Hash256::new([2; 32]),
                status: NodeStatus::Ready,
                active_timestamp: None,
            }],
        };
        list.apply(&change);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(&Hash256::new([2; 32])).unwrap().status, NodeStatus::Ready);
    }
}

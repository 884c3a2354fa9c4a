//! Folds record changes newest-first into a reconstructed node set.
//!
//! Backwards sync walks the chain from the tip, so a removal or status seen
//! first is the most recent one. A removal hides every older mention of the
//! id; for status updates the first one seen wins.

use shoal_types::{Node, NodeId};
use std::collections::{HashMap, HashSet};

use crate::nodelist::{Change, NodeUpdate};

#[derive(Debug, Default)]
pub struct ChangeSquasher {
    removed: HashSet<NodeId>,
    updates: HashMap<NodeId, NodeUpdate>,
    added: HashMap<NodeId, Node>,
}

impl ChangeSquasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the change of the next older record.
    pub fn add_change(&mut self, change: &Change) {
        for id in &change.removed {
            if !self.added.contains_key(id) {
                self.removed.insert(*id);
            }
        }
        for update in &change.updated {
            if self.removed.contains(&update.id) {
                continue;
            }
            self.updates.entry(update.id).or_insert_with(|| update.clone());
        }
        for node in &change.added {
            if self.removed.contains(&node.id) || self.added.contains_key(&node.id) {
                continue;
            }
            self.added.insert(node.id, node.clone());
        }
    }

    fn resolved(&self, node: &Node) -> Node {
        let mut node = node.clone();
        if let Some(update) = self.updates.get(&node.id) {
            node.status = update.status;
            if let Some(ts) = update.active_timestamp {
                node.active_timestamp = ts;
            }
        }
        node
    }

    /// Nodes reconstructed so far, in id order.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.added.values().map(|n| self.resolved(n)).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn total(&self) -> usize {
        self.added.len()
    }

    pub fn active(&self) -> usize {
        self.added
            .values()
            .filter(|n| self.resolved(n).is_active())
            .count()
    }

    /// Whether the reconstruction accounts for the network's counts.
    pub fn covers(&self, active: usize, total: usize) -> bool {
        self.active() >= active && self.total() >= total
    }
}

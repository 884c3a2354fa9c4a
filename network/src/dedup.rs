//! Rolling hash set for gossip deduplication.
//!
//! Every gossip payload is identified by the Blake2b hash of its canonical
//! JSON. Checking and recording happen in one call so a second copy that
//! arrives while the first is still being handled is always seen.

use serde_json::Value;
use shoal_crypto::CryptoError;
use shoal_types::Hash256;
use std::collections::{HashSet, VecDeque};

/// Default dedup capacity: track the last 65 536 payload hashes.
pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

/// Keeps the last `capacity` payload hashes in insertion order and evicts the
/// oldest when full.
pub struct MessageDedup {
    capacity: usize,
    hashes: HashSet<Hash256>,
    order: VecDeque<Hash256>,
}

impl MessageDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            hashes: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `hash`. Returns `true` if it was new, `false` for a duplicate.
    pub fn insert_if_absent(&mut self, hash: Hash256) -> bool {
        if self.hashes.contains(&hash) {
            return false;
        }
        if self.hashes.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.hashes.remove(&old);
            }
        }
        self.hashes.insert(hash);
        self.order.push_back(hash);
        true
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.hashes.contains(hash)
    }

    /// Content hash of a raw gossip payload.
    pub fn hash_payload(payload: &Value) -> Result<Hash256, CryptoError> {
        shoal_crypto::hash_obj(payload)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
        self.order.clear();
    }
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn h(data: &Value) -> Hash256 {
        MessageDedup::hash_payload(data).unwrap()
    }

    #[test]
    fn second_insert_is_duplicate() {
        let mut dedup = MessageDedup::new(100);
        let hash = h(&json!({"a": 1}));
        assert!(dedup.insert_if_absent(hash));
        assert!(!dedup.insert_if_absent(hash));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(h(&a), h(&b));
    }

    #[test]
    fn evicts_oldest_when_at_capacity() {
        let mut dedup = MessageDedup::new(3);
        let hashes: Vec<_> = (0..4).map(|i| h(&json!({ "n": i }))).collect();

        for hash in &hashes[..3] {
            assert!(dedup.insert_if_absent(*hash));
        }
        assert!(dedup.insert_if_absent(hashes[3]));
        assert_eq!(dedup.len(), 3);
        assert!(!dedup.contains(&hashes[0]));
        assert!(dedup.contains(&hashes[1]));
    }

    #[test]
    fn default_uses_standard_capacity() {
        assert_eq!(MessageDedup::default().capacity, DEFAULT_DEDUP_CAPACITY);
    }
}

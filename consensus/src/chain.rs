//! Cycle chain: finalized records with their markers, oldest first.
//!
//! Appends must link to the newest record. Backwards sync prepends, and each
//! prepended record must be the one the current oldest points at.

use shoal_crypto::{hash_obj, CryptoError};
use shoal_types::{CycleMarker, CycleRecord};
use std::collections::VecDeque;

use crate::error::ConsensusError;

/// Records kept in memory before the oldest are pruned.
pub const DEFAULT_RETAINED_RECORDS: usize = 1000;

/// Marker of a record: Blake2b of its canonical JSON.
pub fn marker_of(record: &CycleRecord) -> Result<CycleMarker, CryptoError> {
    hash_obj(record)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChainEntry {
    pub record: CycleRecord,
    pub marker: CycleMarker,
}

#[derive(Clone, Debug)]
pub struct CycleChain {
    entries: VecDeque<ChainEntry>,
    retained: usize,
}

impl CycleChain {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED_RECORDS)
    }

    pub fn with_retention(retained: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retained: retained.max(1),
        }
    }

    pub fn newest(&self) -> Option<&ChainEntry> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&ChainEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, counter: u64) -> Option<&ChainEntry> {
        let first = self.entries.front()?.record.counter;
        let idx = counter.checked_sub(first)?;
        self.entries.get(usize::try_from(idx).ok()?)
    }

    /// Records with `start <= counter <= end` that are still held.
    pub fn range(&self, start: u64, end: u64) -> Vec<CycleRecord> {
        self.entries
            .iter()
            .filter(|e| e.record.counter >= start && e.record.counter <= end)
            .map(|e| e.record.clone())
            .collect()
    }

    /// Check that `record` may be appended. An empty chain accepts any record.
    pub fn validate_append(&self, record: &CycleRecord) -> Result<(), ConsensusError> {
        let Some(tip) = self.newest() else {
            return Ok(());
        };
        if record.counter <= tip.record.counter {
            if self
                .get(record.counter)
                .is_some_and(|e| e.record.previous == record.previous)
            {
                return Err(ConsensusError::DuplicateDigest(record.counter));
            }
            return Err(ConsensusError::CounterGap {
                expected: tip.record.counter + 1,
                actual: record.counter,
            });
        }
        if record.counter != tip.record.counter + 1 {
            return Err(ConsensusError::CounterGap {
                expected: tip.record.counter + 1,
                actual: record.counter,
            });
        }
        if record.previous != tip.marker {
            return Err(ConsensusError::BrokenLink {
                counter: record.counter,
                expected: tip.marker,
                actual: record.previous,
            });
        }
        Ok(())
    }

    /// Validate and append. Returns the record's marker.
    pub fn append(&mut self, record: CycleRecord) -> Result<CycleMarker, ConsensusError> {
        self.validate_append(&record)?;
        let marker = marker_of(&record)?;
        self.entries.push_back(ChainEntry { record, marker });
        while self.entries.len() > self.retained {
            self.entries.pop_front();
        }
        Ok(marker)
    }

    /// Prepend an older record during backwards sync.
    pub fn prepend(&mut self, record: CycleRecord) -> Result<CycleMarker, ConsensusError> {
        let marker = marker_of(&record)?;
        if let Some(oldest) = self.oldest() {
            if oldest.record.counter != record.counter + 1 {
                return Err(ConsensusError::CounterGap {
                    expected: oldest.record.counter.saturating_sub(1),
                    actual: record.counter,
                });
            }
            if oldest.record.previous != marker {
                return Err(ConsensusError::BrokenLink {
                    counter: oldest.record.counter,
                    expected: marker,
                    actual: oldest.record.previous,
                });
            }
        }
        self.entries.push_front(ChainEntry { record, marker });
        Ok(marker)
    }

    /// Drop every record. Used before a resync.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl Default for CycleChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::{Hash256, NetworkId};

    fn chain_of(n: u64) -> CycleChain {
        let mut chain = CycleChain::new();
        let mut prev = Hash256::ZERO;
        for counter in 0..n {
            let rec = CycleRecord::skeleton(NetworkId::Dev, counter, prev, 100 + counter * 60, 60);
            prev = chain.append(rec).unwrap();
        }
        chain
    }

    #[test]
    fn appends_link_to_tip() {
        let chain = chain_of(3);
        assert_eq!(chain.len(), 3);
        let tip = chain.newest().unwrap();
        assert_eq!(tip.record.counter, 2);
        assert_eq!(tip.record.previous, chain.get(1).unwrap().marker);
    }

    #[test]
    fn rejects_bad_previous() {
        let mut chain = chain_of(2);
        let rec = CycleRecord::skeleton(NetworkId::Dev, 2, Hash256::new([7; 32]), 220, 60);
        let err = chain.append(rec).unwrap_err();
        assert!(matches!(err, ConsensusError::BrokenLink { counter: 2, .. }));
        assert!(err.is_integrity_violation());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn rejects_second_digest_of_same_counter() {
        let mut chain = chain_of(2);
        let again = chain.get(1).unwrap().record.clone();
        assert!(matches!(
            chain.append(again),
            Err(ConsensusError::DuplicateDigest(1))
        ));
    }

    #[test]
    fn rejects_counter_gap() {
        let mut chain = chain_of(2);
        let tip = chain.newest().unwrap().marker;
        let rec = CycleRecord::skeleton(NetworkId::Dev, 5, tip, 400, 60);
        assert!(matches!(
            chain.append(rec),
            Err(ConsensusError::CounterGap { expected: 2, actual: 5 })
        ));
    }

    #[test]
    fn prepend_checks_link() {
        let full = chain_of(3);
        let mut partial = CycleChain::new();
        partial.append(full.get(2).unwrap().record.clone()).unwrap();

        partial.prepend(full.get(1).unwrap().record.clone()).unwrap();
        assert_eq!(partial.oldest().unwrap().record.counter, 1);

        let wrong = CycleRecord::skeleton(NetworkId::Dev, 0, Hash256::new([1; 32]), 0, 60);
        assert!(partial.prepend(wrong).is_err());
    }

    #[test]
    fn range_and_retention() {
        let mut chain = CycleChain::with_retention(2);
        let mut prev = Hash256::ZERO;
        for counter in 0..4 {
            let rec = CycleRecord::skeleton(NetworkId::Dev, counter, prev, counter * 60, 60);
            prev = chain.append(rec).unwrap();
        }
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.oldest().unwrap().record.counter, 2);
        let counters: Vec<u64> = chain.range(0, 10).iter().map(|r| r.counter).collect();
        assert_eq!(counters, vec![2, 3]);
        assert!(chain.get(1).is_none());
    }
}

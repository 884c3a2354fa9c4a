//! Archiver list, keyed and ordered by public key.

use shoal_crypto::CryptoError;
use shoal_types::{Archiver, Hash256, PublicKey};
use std::collections::BTreeMap;

use crate::nodelist::list_hash;

#[derive(Clone, Debug, Default)]
pub struct ArchiverList {
    by_pubkey: BTreeMap<PublicKey, Archiver>,
}

impl ArchiverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_archivers(archivers: impl IntoIterator<Item = Archiver>) -> Self {
        Self {
            by_pubkey: archivers
                .into_iter()
                .map(|a| (a.public_key, a))
                .collect(),
        }
    }

    /// Returns `false` if an archiver with this key is already listed.
    pub fn add(&mut self, archiver: Archiver) -> bool {
        if self.by_pubkey.contains_key(&archiver.public_key) {
            return false;
        }
        self.by_pubkey.insert(archiver.public_key, archiver);
        true
    }

    pub fn remove(&mut self, pk: &PublicKey) -> Option<Archiver> {
        self.by_pubkey.remove(pk)
    }

    pub fn get(&self, pk: &PublicKey) -> Option<&Archiver> {
        self.by_pubkey.get(pk)
    }

    pub fn contains(&self, pk: &PublicKey) -> bool {
        self.by_pubkey.contains_key(pk)
    }

    pub fn len(&self) -> usize {
        self.by_pubkey.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pubkey.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archiver> + '_ {
        self.by_pubkey.values()
    }

    pub fn to_vec(&self) -> Vec<Archiver> {
        self.by_pubkey.values().cloned().collect()
    }

    pub fn hash(&self) -> Result<Hash256, CryptoError> {
        list_hash(&self.to_vec())
    }

    /// The list as it will be once `joined` is added and `removed` dropped.
    pub fn with_changes(&self, joined: &[Archiver], removed: &[PublicKey]) -> Self {
        let mut next = self.clone();
        for a in joined {
            next.add(a.clone());
        }
        for pk in removed {
            next.remove(pk);
        }
        next
    }

    pub fn reset(&mut self) {
        self.by_pubkey.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::CurvePublicKey;

    fn archiver(b: u8) -> Archiver {
        Archiver {
            public_key: PublicKey([b; 32]),
            curve_public_key: CurvePublicKey([b; 32]),
            ip: format!("10.1.0.{b}"),
            port: 4000,
        }
    }

    #[test]
    fn iterates_in_key_order() {
        let list = ArchiverList::from_archivers([archiver(3), archiver(1), archiver(2)]);
        let keys: Vec<u8> = list.iter().map(|a| a.public_key.0[0]).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn with_changes_leaves_original_alone() {
        let list = ArchiverList::from_archivers([archiver(1)]);
        let next = list.with_changes(&[archiver(2)], &[PublicKey([1; 32])]);
        assert_eq!(list.len(), 1);
        assert!(next.contains(&PublicKey([2; 32])));
        assert!(!next.contains(&PublicKey([1; 32])));
        assert_ne!(list.hash().unwrap(), next.hash().unwrap());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut list = ArchiverList::new();
        assert!(list.add(archiver(1)));
        assert!(!list.add(archiver(1)));
    }
}

//! Binary-search insert and remove on sorted vectors.
//!
//! Membership views are read on every gossip fan-out, so they are kept
//! sorted incrementally instead of being re-sorted after each change.

use std::cmp::Ordering;

/// Insert `item` at its sorted position. Returns `false` without inserting
/// when an element comparing equal is already present.
pub fn insert_sorted<T, F>(vec: &mut Vec<T>, item: T, mut cmp: F) -> bool
where
    F: FnMut(&T, &T) -> Ordering,
{
    match vec.binary_search_by(|probe| cmp(probe, &item)) {
        Ok(_) => false,
        Err(pos) => {
            vec.insert(pos, item);
            true
        }
    }
}

/// Remove the element comparing equal to `probe_item`, if any.
pub fn remove_sorted<T, F>(vec: &mut Vec<T>, probe_item: &T, mut cmp: F) -> Option<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    match vec.binary_search_by(|probe| cmp(probe, probe_item)) {
        Ok(pos) => Some(vec.remove(pos)),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_order_and_rejects_duplicates() {
        let mut v = vec![1, 3, 5];
        assert!(insert_sorted(&mut v, 4, |a, b| a.cmp(b)));
        assert!(!insert_sorted(&mut v, 3, |a, b| a.cmp(b)));
        assert_eq!(v, vec![1, 3, 4, 5]);
    }

    #[test]
    fn remove_finds_element() {
        let mut v = vec![(1, 'a'), (2, 'b'), (3, 'c')];
        let removed = remove_sorted(&mut v, &(2, 'x'), |a, b| a.0.cmp(&b.0));
        assert_eq!(removed, Some((2, 'b')));
        assert_eq!(remove_sorted(&mut v, &(9, 'z'), |a, b| a.0.cmp(&b.0)), None);
        assert_eq!(v.len(), 2);
    }
}

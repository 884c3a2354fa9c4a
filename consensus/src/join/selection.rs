//! Leaderless candidate selection.
//!
//! Every node ranks the same candidates by selection number, highest first,
//! breaking ties by public key ascending, and takes the top `n`. Scores come
//! from [`shoal_crypto::selection_num`] over a seed the candidate could not
//! know when it signed its request.

use shoal_crypto::blake2b_256_multi;
use shoal_types::{CycleMarker, Hash256, NodeInfo, PublicKey, SelectionNum};
use std::cmp::Ordering;
use std::collections::BTreeSet;

fn by_rank(a: (&SelectionNum, &PublicKey), b: (&SelectionNum, &PublicKey)) -> Ordering {
    b.0.cmp(a.0).then_with(|| a.1.cmp(b.1))
}

/// The `n` best candidates in rank order.
pub fn select_top<T, F>(candidates: impl IntoIterator<Item = T>, n: usize, key: F) -> Vec<T>
where
    F: Fn(&T) -> (&SelectionNum, &PublicKey),
{
    let mut ranked: Vec<T> = candidates.into_iter().collect();
    ranked.sort_by(|a, b| by_rank(key(a), key(b)));
    ranked.truncate(n);
    ranked
}

/// Like [`select_top`], but a candidate is skipped when its external
/// address is `in_use` or already claimed by a better-ranked pick.
pub fn select_top_distinct<T, F, I, U>(
    candidates: impl IntoIterator<Item = T>,
    n: usize,
    key: F,
    info: I,
    in_use: U,
) -> Vec<T>
where
    F: Fn(&T) -> (&SelectionNum, &PublicKey),
    I: Fn(&T) -> &NodeInfo,
    U: Fn(&NodeInfo) -> bool,
{
    let mut claimed = BTreeSet::new();
    let mut picked = Vec::new();
    for candidate in select_top(candidates, usize::MAX, key) {
        if picked.len() == n {
            break;
        }
        let node_info = info(&candidate);
        let addr = (node_info.external_ip.clone(), node_info.external_port);
        if in_use(node_info) || claimed.contains(&addr) {
            tracing::debug!(
                public_key = %node_info.public_key,
                addr = %node_info.external_addr(),
                "skipping candidate with a taken address"
            );
            continue;
        }
        claimed.insert(addr);
        picked.push(candidate);
    }
    picked
}

/// Seed for ranking the candidates gathered during one cycle: the newest
/// marker folded with every candidate key, so no single candidate knows the
/// seed when it signs.
pub fn cycle_seed<'a>(
    marker: &CycleMarker,
    candidates: impl IntoIterator<Item = &'a PublicKey>,
) -> Hash256 {
    let keys: BTreeSet<&PublicKey> = candidates.into_iter().collect();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
    parts.push(marker.as_bytes());
    for pk in keys {
        parts.push(pk.as_bytes());
    }
    Hash256::new(blake2b_256_multi(&parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::Hash256;

    fn num(n: u8) -> SelectionNum {
        let mut b = [0u8; 32];
        b[31] = n;
        Hash256::new(b)
    }

    #[test]
    fn picks_highest_selection_numbers() {
        let a = (PublicKey([0xA; 32]), num(10));
        let b = (PublicKey([0xB; 32]), num(30));
        let c = (PublicKey([0xC; 32]), num(20));
        let picked = select_top(vec![a, b, c], 2, |(pk, n)| (n, pk));
        let names: Vec<u8> = picked.iter().map(|(pk, _)| pk.0[0]).collect();
        assert_eq!(names, vec![0xB, 0xC]);
    }

    #[test]
    fn ties_go_to_lower_public_key() {
        let x = (PublicKey([2; 32]), num(5));
        let y = (PublicKey([1; 32]), num(5));
        let picked = select_top(vec![x, y], 1, |(pk, n)| (n, pk));
        assert_eq!(picked[0].0, PublicKey([1; 32]));
    }

    #[test]
    fn asking_for_more_than_available() {
        let only = vec![(PublicKey([1; 32]), num(1))];
        assert_eq!(select_top(only, 5, |(pk, n)| (n, pk)).len(), 1);
    }

    fn info(seed: u8, ip: &str) -> NodeInfo {
        NodeInfo {
            public_key: PublicKey([seed; 32]),
            curve_public_key: shoal_types::CurvePublicKey([seed; 32]),
            external_ip: ip.into(),
            external_port: 9001,
            internal_ip: ip.into(),
            internal_port: 10001,
        }
    }

    #[test]
    fn distinct_selection_skips_shared_and_taken_addresses() {
        let a = (info(0xA, "10.0.0.1"), num(30));
        let b = (info(0xB, "10.0.0.1"), num(20));
        let c = (info(0xC, "10.0.0.2"), num(10));
        let d = (info(0xD, "10.0.0.3"), num(5));
        let picked = select_top_distinct(
            vec![a, b, c, d],
            2,
            |(i, n)| (n, &i.public_key),
            |(i, _)| i,
            |i| i.external_ip == "10.0.0.2",
        );
        let names: Vec<u8> = picked.iter().map(|(i, _)| i.public_key.0[0]).collect();
        assert_eq!(names, vec![0xA, 0xD]);
    }

    #[test]
    fn cycle_seed_ignores_order_but_not_membership() {
        let marker = Hash256::new([7; 32]);
        let (x, y, z) = (PublicKey([1; 32]), PublicKey([2; 32]), PublicKey([3; 32]));
        assert_eq!(cycle_seed(&marker, [&x, &y]), cycle_seed(&marker, [&y, &x]));
        assert_ne!(cycle_seed(&marker, [&x, &y]), cycle_seed(&marker, [&x, &y, &z]));
        assert_ne!(
            cycle_seed(&marker, [&x]),
            cycle_seed(&Hash256::new([8; 32]), [&x])
        );
    }
}

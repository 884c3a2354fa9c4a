//! Quorum queries: only trust a value once enough peers return it.
//!
//! Peers are shuffled and queried in batches. Each batch is just large enough
//! to reach `redundancy` if every answer matched the current leader, so the
//! fan-out never exceeds `redundancy` concurrent requests. Answers are tallied
//! by a caller-supplied equality. If peers run out or [`MAX_QUERY_ROUNDS`]
//! pass without a quorum, the best-supported answer is returned flagged as
//! non-robust and the caller decides whether that is good enough.

use futures_util::future::join_all;
use rand::seq::SliceRandom;
use std::fmt::Display;
use std::future::Future;

use crate::NetworkError;

/// Query rounds before giving up on a quorum.
pub const MAX_QUERY_ROUNDS: usize = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct RobustQueryResult<N, R> {
    pub top_result: R,
    /// Nodes that returned `top_result`.
    pub winning_nodes: Vec<N>,
    /// Whether `top_result` reached the requested redundancy.
    pub is_robust_result: bool,
}

impl<N, R> RobustQueryResult<N, R> {
    pub fn count(&self) -> usize {
        self.winning_nodes.len()
    }
}

struct Tally<N, R> {
    buckets: Vec<(R, Vec<N>)>,
}

impl<N, R> Tally<N, R> {
    fn new() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }

    fn add(&mut self, node: N, response: R, eq: &impl Fn(&R, &R) -> bool) -> usize {
        if let Some((_, nodes)) = self.buckets.iter_mut().find(|(r, _)| eq(r, &response)) {
            nodes.push(node);
            return nodes.len();
        }
        self.buckets.push((response, vec![node]));
        1
    }

    fn best_count(&self) -> usize {
        self.buckets.iter().map(|(_, n)| n.len()).max().unwrap_or(0)
    }

    /// Highest tally; the first bucket to reach it wins ties.
    fn into_best(self) -> Option<(R, Vec<N>)> {
        let mut best: Option<(R, Vec<N>)> = None;
        for (r, nodes) in self.buckets {
            let better = match &best {
                Some((_, b)) => nodes.len() > b.len(),
                None => true,
            };
            if better {
                best = Some((r, nodes));
            }
        }
        best
    }
}

/// Query `nodes` until `redundancy` of them agree.
///
/// `redundancy` is clamped to `1..=nodes.len()`. Failed queries count
/// against no bucket. An error is returned only when there is nothing to
/// query or no node answered at all.
pub async fn robust_query<N, R, E, Q, Fut, S>(
    nodes: &[N],
    query: Q,
    equal: S,
    redundancy: usize,
) -> Result<RobustQueryResult<N, R>, NetworkError>
where
    N: Clone,
    E: Display,
    Q: Fn(N) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    S: Fn(&R, &R) -> bool,
{
    if nodes.is_empty() {
        return Err(NetworkError::NoNodes);
    }
    let redundancy = redundancy.clamp(1, nodes.len());

    let mut order: Vec<N> = nodes.to_vec();
    order.shuffle(&mut rand::thread_rng());
    let mut remaining = order.into_iter();

    let mut tally = Tally::new();
    let mut errors = 0usize;
    let mut rounds = 0usize;

    loop {
        rounds += 1;
        let wanted = redundancy - tally.best_count();
        let batch: Vec<N> = remaining.by_ref().take(wanted).collect();
        if batch.is_empty() {
            break;
        }

        let answers = join_all(batch.into_iter().map(|node| {
            let fut = query(node.clone());
            async move { (node, fut.await) }
        }))
        .await;

        for (node, answer) in answers {
            match answer {
                Ok(response) => {
                    if tally.add(node, response, &equal) >= redundancy {
                        if let Some((top_result, winning_nodes)) = tally.into_best() {
                            return Ok(RobustQueryResult {
                                top_result,
                                winning_nodes,
                                is_robust_result: true,
                            });
                        }
                        return Err(NetworkError::NoResponses);
                    }
                }
                Err(e) => {
                    errors += 1;
                    tracing::debug!(error = %e, "robust query: peer failed");
                }
            }
        }

        if rounds >= MAX_QUERY_ROUNDS {
            break;
        }
    }

    match tally.into_best() {
        Some((top_result, winning_nodes)) => {
            tracing::debug!(
                count = winning_nodes.len(),
                redundancy,
                errors,
                "robust query: no quorum, returning best tally"
            );
            Ok(RobustQueryResult {
                top_result,
                winning_nodes,
                is_robust_result: false,
            })
        }
        None => Err(NetworkError::NoResponses),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn answer(table: &HashMap<u32, Result<&'static str, &'static str>>, n: u32)
        -> Result<&'static str, String> {
        table[&n].map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn three_of_five_is_robust() {
        let table: HashMap<u32, _> = [
            (1, Ok("V")),
            (2, Ok("V")),
            (3, Ok("V")),
            (4, Ok("X")),
            (5, Ok("Y")),
        ]
        .into_iter()
        .collect();
        let nodes = vec![1, 2, 3, 4, 5];

        let res = robust_query(&nodes, |n| answer(&table, n), |a, b| a == b, 3)
            .await
            .unwrap();
        assert!(res.is_robust_result);
        assert_eq!(res.top_result, "V");
        let mut winners = res.winning_nodes.clone();
        winners.sort();
        assert_eq!(winners, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_distinct_is_not_robust() {
        let table: HashMap<u32, _> = [
            (1, Ok("a")),
            (2, Ok("b")),
            (3, Ok("c")),
            (4, Ok("d")),
            (5, Ok("e")),
        ]
        .into_iter()
        .collect();
        let nodes = vec![1, 2, 3, 4, 5];

        let res = robust_query(&nodes, |n| answer(&table, n), |a, b| a == b, 3)
            .await
            .unwrap();
        assert!(!res.is_robust_result);
        assert_eq!(res.count(), 1);
        assert!(["a", "b", "c", "d", "e"].contains(&res.top_result));
    }

    #[tokio::test]
    async fn redundancy_is_clamped_to_node_count() {
        let table: HashMap<u32, _> = [(1, Ok("V")), (2, Ok("V"))].into_iter().collect();
        let res = robust_query(&[1, 2], |n| answer(&table, n), |a, b| a == b, 5)
            .await
            .unwrap();
        assert!(res.is_robust_result);
        assert_eq!(res.count(), 2);
    }

    #[tokio::test]
    async fn failures_do_not_count_as_votes() {
        let table: HashMap<u32, _> = [
            (1, Err("down")),
            (2, Ok("V")),
            (3, Err("down")),
            (4, Ok("V")),
        ]
        .into_iter()
        .collect();
        let res = robust_query(&[1, 2, 3, 4], |n| answer(&table, n), |a, b| a == b, 2)
            .await
            .unwrap();
        assert!(res.is_robust_result);
        assert_eq!(res.top_result, "V");
    }

    #[tokio::test]
    async fn no_answers_is_an_error() {
        let table: HashMap<u32, _> = [(1, Err("down")), (2, Err("down"))].into_iter().collect();
        let err = robust_query(&[1, 2], |n| answer(&table, n), |a, b| a == b, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NoResponses));
    }

    #[tokio::test]
    async fn empty_node_list_is_an_error() {
        let nodes: Vec<u32> = Vec::new();
        let err = robust_query(&nodes, |_n| async { Ok::<u8, String>(1) }, |a, b| a == b, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NoNodes));
    }
}

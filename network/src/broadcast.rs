//! Flood-gossip fan-out.
//!
//! The [`Broadcaster`] does not call the transport directly. It pushes
//! `(peer, envelope)` tuples onto an `mpsc` channel that [`run_outbound`]
//! drains, so handlers holding the engine lock never wait on the network.

use rand::seq::SliceRandom;
use shoal_messages::GossipEnvelope;
use shoal_types::NodeId;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::transport::{PeerAddr, Transport};

/// Outcome of a broadcast attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of peers the message was queued for.
    pub sent: usize,
    /// Number of peers for which queueing failed (channel full / closed).
    pub failed: usize,
}

/// A gossip target: node id plus where to reach it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipTarget {
    pub id: NodeId,
    pub addr: PeerAddr,
}

/// Queue-based gossip broadcaster.
#[derive(Clone)]
pub struct Broadcaster {
    outbound_tx: mpsc::Sender<(PeerAddr, GossipEnvelope)>,
}

impl Broadcaster {
    /// Create a new broadcaster backed by the given outbound channel.
    pub fn new(outbound_tx: mpsc::Sender<(PeerAddr, GossipEnvelope)>) -> Self {
        Self { outbound_tx }
    }

    /// Queue `envelope` for at most `count` random peers, never for a peer
    /// whose id is in `exclude` (self, sender, origin).
    pub fn gossip_to_subset(
        &self,
        envelope: &GossipEnvelope,
        peers: &[GossipTarget],
        exclude: &[NodeId],
        count: usize,
    ) -> BroadcastResult {
        let mut eligible: Vec<&GossipTarget> =
            peers.iter().filter(|p| !exclude.contains(&p.id)).collect();

        let mut rng = rand::thread_rng();
        eligible.shuffle(&mut rng);
        eligible.truncate(count);

        let mut result = BroadcastResult::default();
        for peer in eligible {
            match self
                .outbound_tx
                .try_send((peer.addr.clone(), envelope.clone()))
            {
                Ok(()) => result.sent += 1,
                Err(_) => result.failed += 1,
            }
        }
        result
    }

    /// Queue `envelope` for one specific peer.
    pub fn send_to(&self, envelope: &GossipEnvelope, to: &PeerAddr) -> bool {
        self.outbound_tx
            .try_send((to.clone(), envelope.clone()))
            .is_ok()
    }
}

/// Drain the outbound queue, handing each envelope to the transport.
///
/// Each send runs in its own task so one slow peer does not hold up the rest.
/// Returns when every [`Broadcaster`] clone has been dropped.
pub async fn run_outbound(
    mut outbound_rx: mpsc::Receiver<(PeerAddr, GossipEnvelope)>,
    transport: Arc<dyn Transport>,
) {
    while let Some((to, envelope)) = outbound_rx.recv().await {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Err(e) = transport.send_gossip(&to, &envelope).await {
                tracing::debug!(peer = %to, route = %envelope.route, error = %e, "gossip send failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::Hash256;

    fn id(b: u8) -> NodeId {
        Hash256::new([b; 32])
    }

    fn target(b: u8) -> GossipTarget {
        GossipTarget {
            id: id(b),
            addr: PeerAddr::new(format!("10.0.0.{b}"), 9001),
        }
    }

    fn envelope() -> GossipEnvelope {
        GossipEnvelope {
            route: "gossip-active".into(),
            payload: serde_json::json!({}),
            tracker: "t".into(),
            sender: id(1),
            origin: id(2),
        }
    }

    #[tokio::test]
    async fn subset_limits_count() {
        let (tx, mut rx) = mpsc::channel(64);
        let broadcaster = Broadcaster::new(tx);
        let peers: Vec<_> = (10..20).map(target).collect();

        let result = broadcaster.gossip_to_subset(&envelope(), &peers, &[], 3);
        assert_eq!(result, BroadcastResult { sent: 3, failed: 0 });

        let mut received = Vec::new();
        while let Ok(item) = rx.try_recv() {
            received.push(item);
        }
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn subset_skips_excluded_ids() {
        let (tx, mut rx) = mpsc::channel(64);
        let broadcaster = Broadcaster::new(tx);
        let peers = vec![target(1), target(2), target(3), target(4)];

        let result = broadcaster.gossip_to_subset(&envelope(), &peers, &[id(1), id(2), id(3)], 10);
        assert_eq!(result.sent, 1);

        let (addr, _) = rx.recv().await.unwrap();
        assert_eq!(addr, PeerAddr::new("10.0.0.4", 9001));
    }

    #[tokio::test]
    async fn full_channel_counts_failures() {
        let (tx, _rx) = mpsc::channel(1);
        let broadcaster = Broadcaster::new(tx);
        let peers = vec![target(1), target(2), target(3)];

        let result = broadcaster.gossip_to_subset(&envelope(), &peers, &[], 3);
        assert_eq!(result.sent + result.failed, 3);
        assert!(result.failed > 0);
    }
}

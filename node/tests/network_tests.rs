//! Multi-node scenarios over the in-process network.
//!
//! Tokio's clock is paused, so the cycle timers and the node clocks advance
//! together as fast as the nodes go idle.

use std::sync::Arc;
use std::time::Duration;

use shoal_crypto::keypair_from_seed;
use shoal_messages::{routes, CycleMarkerResponse};
use shoal_network::{fetch, PeerAddr, Transport};
use shoal_node::{NodeConfig, ShoalNode};
use shoal_nullables::NullNetwork;
use shoal_types::{Clock, CycleParams, NodeStatus};

const T0_MS: u64 = 1_700_000_000_000;

/// Wall clock that follows tokio's (paused) clock.
struct VirtualClock {
    base_ms: u64,
    origin: tokio::time::Instant,
}

impl VirtualClock {
    fn new() -> Self {
        Self {
            base_ms: T0_MS,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }
}

fn config(n: u16, seeds: &[u16]) -> NodeConfig {
    NodeConfig {
        cycle: CycleParams::dev_defaults(),
        external_ip: format!("10.0.0.{n}"),
        internal_ip: format!("10.0.0.{n}"),
        seed_nodes: seeds.iter().map(|s| format!("10.0.0.{s}:29001")).collect(),
        enable_rpc: false,
        check_clock: false,
        ..NodeConfig::default()
    }
}

/// Build node `n` and wire it into `net`. `internal` controls whether its
/// internal port accepts connections.
fn build(net: &Arc<NullNetwork>, clock: &Arc<VirtualClock>, n: u16, seeds: &[u16], internal: bool) -> ShoalNode {
    let config = config(n, seeds);
    let external = config.external_addr();
    let internal_addr = config.internal_addr();
    let node = ShoalNode::new(
        config,
        keypair_from_seed(&[n as u8; 32]),
        Arc::clone(net) as Arc<dyn Transport>,
        Arc::clone(clock) as Arc<dyn Clock>,
    )
    .unwrap();
    net.register(external, node.router());
    if internal {
        net.listen(internal_addr);
    }
    node
}

async fn wait_for_status(node: &ShoalNode, want: NodeStatus, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if node.handle().status().await == Some(want) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

fn cycles(n: u32) -> Duration {
    Duration::from_secs(CycleParams::dev_defaults().cycle_duration) * n
}

#[tokio::test(start_paused = true)]
async fn seed_serves_its_marker() {
    let net = Arc::new(NullNetwork::new());
    let clock = Arc::new(VirtualClock::new());
    let mut seed = build(&net, &clock, 1, &[], true);
    seed.start().await.unwrap();

    tokio::time::sleep(cycles(2)).await;
    let marker: CycleMarkerResponse = fetch(
        net.as_ref(),
        &PeerAddr::new("10.0.0.1", 29001),
        routes::HTTP_CYCLE_MARKER,
    )
    .await
    .unwrap();
    assert!(marker.counter >= 1);
    assert_eq!(marker.duration, 16);

    seed.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn second_node_joins_syncs_and_activates() {
    shoal_utils::init_test_tracing();
    let net = Arc::new(NullNetwork::new());
    let clock = Arc::new(VirtualClock::new());

    let mut seed = build(&net, &clock, 1, &[], true);
    seed.start().await.unwrap();
    tokio::time::sleep(cycles(1)).await;

    let mut joiner = build(&net, &clock, 2, &[1], true);
    joiner.start().await.unwrap();

    assert!(
        wait_for_status(&joiner, NodeStatus::Active, cycles(30)).await,
        "joiner never became active"
    );
    assert!(joiner.handle().is_synced());

    // both nodes now agree on the chain
    tokio::time::sleep(cycles(2)).await;
    let a = seed.handle().engine().lock().await.cycle_marker().unwrap();
    let b = joiner.handle().engine().lock().await.cycle_marker().unwrap();
    assert_eq!(a.counter, b.counter);
    assert_eq!(a.current_cycle_marker, b.current_cycle_marker);
    assert_eq!(seed.handle().engine().lock().await.nodes().active_count(), 2);

    joiner.stop().await.unwrap();
    seed.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unreachable_candidate_gives_up() {
    let net = Arc::new(NullNetwork::new());
    let clock = Arc::new(VirtualClock::new());

    let mut seed = build(&net, &clock, 1, &[], true);
    seed.start().await.unwrap();
    tokio::time::sleep(cycles(1)).await;

    // internal port never opened
    let mut joiner = build(&net, &clock, 3, &[1], false);
    let mut stopped = joiner.shutdown_controller().subscribe();
    joiner.start().await.unwrap();

    let result = tokio::time::timeout(cycles(4), stopped.recv()).await;
    assert!(result.is_ok(), "joiner kept retrying after a fatal refusal");
    assert!(seed.handle().engine().lock().await.standby_list().is_empty());
    assert_eq!(
        seed.handle().metrics().join_requests.with_label_values(&["fatal"]).get(),
        1
    );

    joiner.stop().await.unwrap();
    seed.stop().await.unwrap();
}

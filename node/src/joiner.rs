//! The join client: from a fresh key to a syncing member of the network.
//!
//! 1. Optional clock check against NTP.
//! 2. Agree on the newest cycle marker with the seeds.
//! 3. Submit a signed join request inside the Q1-Q2 window.
//! 4. Wait for acceptance, refreshing the standby entry and resubmitting if
//!    the request was dropped.
//! 5. Sync, install the snapshot and announce the sync.

use std::time::Duration;

use tracing::Instrument;

use shoal_consensus::quarter::{position, Position};
use shoal_crypto::sign_obj;
use shoal_messages::{
    routes, CycleMarkerResponse, JoinRequest, JoinResponse, JoinedResponse, JoinedV2Response,
    StandbyRefresh,
};
use shoal_network::{fetch, post, ClockSync, PeerAddr, RobustQueryResult};
use shoal_types::{JoinStrategy, Signed};
use shoal_utils::format_millis;

use crate::handle::{Batch, NodeHandle};
use crate::sync::{self, robust_get};
use crate::tracing_spans::join_span;
use crate::NodeError;

/// Full sync attempts before the join is abandoned.
const MAX_SYNC_ATTEMPTS: u32 = 5;

/// Quarters without any trace of the request before it is resubmitted.
const RESUBMIT_AFTER_QUARTERS: u32 = 6;

enum Submission {
    Sent,
    /// Slept until the join window; submit right away.
    WindowOpen,
    Retry,
}

enum Waiting {
    Accepted,
    Dropped,
}

/// Run the join client against `seeds` until this node is installed.
pub async fn run(handle: &NodeHandle, seeds: &[PeerAddr]) -> Result<(), NodeError> {
    let span = join_span(&handle.keys.public.to_hex());
    async {
        if handle.config.check_clock {
            check_clock(handle).await?;
        }
        loop {
            match submit(handle, seeds).await? {
                Submission::WindowOpen => {}
                Submission::Retry => tokio::time::sleep(handle.quarter()).await,
                Submission::Sent => match wait_for_acceptance(handle, seeds).await? {
                    Waiting::Accepted => break,
                    Waiting::Dropped => {
                        tracing::info!("join request dropped, resubmitting");
                    }
                },
            }
        }
        sync_and_install(handle, seeds).await?;
        announce_sync(handle).await
    }
    .instrument(span)
    .await
}

async fn check_clock(handle: &NodeHandle) -> Result<(), NodeError> {
    let mut clock = ClockSync::new(handle.config.max_drift_ms);
    match clock.sample().await {
        Ok(offset) => {
            tracing::info!(offset_ms = offset, "clock checked against NTP");
            clock.check_drift()?;
        }
        Err(e) => tracing::warn!(error = %e, "NTP check failed, continuing with local clock"),
    }
    Ok(())
}

async fn robust_marker(
    handle: &NodeHandle,
    seeds: &[PeerAddr],
) -> Result<RobustQueryResult<PeerAddr, CycleMarkerResponse>, NodeError> {
    robust_get(handle, seeds, routes::HTTP_CYCLE_MARKER).await
}

/// How long until the Q1-Q2 window of the cycle that follows `marker` is
/// open, or `None` if it is open now.
fn until_window(handle: &NodeHandle, marker: &CycleMarkerResponse) -> Option<Duration> {
    let duration_ms = marker.duration.saturating_mul(1000);
    let start_ms = (marker.start + marker.duration).saturating_mul(1000);
    let now = handle.now_ms();
    let quarter_ms = duration_ms / 4;
    match position(now, start_ms, duration_ms) {
        Position::Within(q) if q.accepts_gossip() => None,
        Position::Within(_) => Some(Duration::from_millis(
            (start_ms + duration_ms).saturating_sub(now) + quarter_ms / 10,
        )),
        Position::Before => Some(Duration::from_millis(start_ms.saturating_sub(now) + quarter_ms / 10)),
        // peers are behind; look again shortly
        Position::After { .. } => Some(Duration::from_millis(quarter_ms.max(1))),
    }
}

async fn submit(handle: &NodeHandle, seeds: &[PeerAddr]) -> Result<Submission, NodeError> {
    let agreed = match robust_marker(handle, seeds).await {
        Ok(agreed) => agreed,
        Err(e) => {
            tracing::warn!(error = %e, "seeds did not answer with a cycle marker");
            return Ok(Submission::Retry);
        }
    };
    let marker = agreed.top_result;
    if let Some(wait) = until_window(handle, &marker) {
        tracing::debug!(
            counter = marker.counter,
            wait = %format_millis(wait.as_millis() as u64),
            "waiting for join window"
        );
        tokio::time::sleep(wait).await;
        return Ok(Submission::WindowOpen);
    }

    let body = JoinRequest {
        node_info: handle.info.clone(),
        cycle_marker: marker.current_cycle_marker,
        timestamp: handle.now_ms() / 1000,
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };
    let request: Signed<JoinRequest> = sign_obj(body, &handle.keys)?;

    let mut fatal = None;
    let targets = agreed
        .winning_nodes
        .iter()
        .take(handle.config.cycle.redundancy.max(1));
    for peer in targets {
        match post::<_, JoinResponse>(handle.transport(), peer, routes::HTTP_JOIN, &request).await {
            Ok(resp) if resp.success => {
                tracing::info!(
                    peer = %peer,
                    counter = marker.counter + 1,
                    standby = ?resp.num_standby_nodes,
                    "join request accepted for consideration"
                );
                return Ok(Submission::Sent);
            }
            Ok(resp) => {
                let reason = resp.reason.unwrap_or_default();
                tracing::info!(peer = %peer, fatal = resp.fatal, %reason, "join request refused");
                if resp.fatal {
                    fatal = Some(reason);
                }
            }
            Err(e) => tracing::debug!(peer = %peer, error = %e, "join request failed"),
        }
    }
    match fatal {
        Some(reason) => Err(NodeError::Refused(reason)),
        None => Ok(Submission::Retry),
    }
}

/// Wait for the acceptance notice, polling the seeds each quarter.
async fn wait_for_acceptance(handle: &NodeHandle, seeds: &[PeerAddr]) -> Result<Waiting, NodeError> {
    let strategy = handle.config.cycle.join_strategy;
    let pk = handle.keys.public.to_hex();
    let refresh_every = (handle.config.cycle.standby_list_cycles_ttl / 2).max(1) * 4;
    let mut quarters: u64 = 0;
    let mut missing: u32 = 0;

    loop {
        tokio::select! {
            _ = handle.accepted.notified() => return Ok(Waiting::Accepted),
            _ = tokio::time::sleep(handle.quarter()) => {}
        }
        quarters += 1;

        let found = match strategy {
            JoinStrategy::V1 => {
                let path = format!("{}/{pk}", routes::HTTP_JOINED);
                first_answer::<JoinedResponse>(handle, seeds, &path)
                    .await
                    .map(|r| (r.node.is_some(), false))
            }
            JoinStrategy::V2 => {
                let path = format!("{}/{pk}", routes::HTTP_JOINED_V2);
                first_answer::<JoinedV2Response>(handle, seeds, &path)
                    .await
                    .map(|r| (r.id.is_some(), r.is_on_standby_list))
            }
        };
        match found {
            Some((true, _)) => return Ok(Waiting::Accepted),
            Some((false, true)) => {
                missing = 0;
                if quarters % refresh_every == 0 {
                    refresh_standby(handle, seeds).await;
                }
            }
            Some((false, false)) => {
                missing += 1;
                if missing >= RESUBMIT_AFTER_QUARTERS {
                    return Ok(Waiting::Dropped);
                }
            }
            None => tracing::debug!("no seed answered the acceptance poll"),
        }
    }
}

async fn first_answer<T: serde::de::DeserializeOwned>(
    handle: &NodeHandle,
    seeds: &[PeerAddr],
    path: &str,
) -> Option<T> {
    for seed in seeds {
        match fetch::<T>(handle.transport(), seed, path).await {
            Ok(v) => return Some(v),
            Err(e) => tracing::debug!(peer = %seed, error = %e, "poll failed"),
        }
    }
    None
}

async fn refresh_standby(handle: &NodeHandle, seeds: &[PeerAddr]) {
    let marker = match robust_marker(handle, seeds).await {
        Ok(m) => m.top_result,
        Err(e) => {
            tracing::debug!(error = %e, "no marker for standby refresh");
            return;
        }
    };
    if until_window(handle, &marker).is_some() {
        return;
    }
    let body = StandbyRefresh {
        public_key: handle.keys.public,
        cycle_number: marker.counter + 1,
    };
    let req = match sign_obj(body, &handle.keys) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "could not sign standby refresh");
            return;
        }
    };
    for seed in seeds {
        if let Ok(resp) =
            post::<_, JoinResponse>(handle.transport(), seed, routes::HTTP_STANDBY_REFRESH, &req).await
        {
            tracing::debug!(peer = %seed, success = resp.success, "standby refresh sent");
            return;
        }
    }
}

async fn sync_and_install(handle: &NodeHandle, seeds: &[PeerAddr]) -> Result<(), NodeError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = async {
            let peers = sync::discover_peers(handle, seeds).await?;
            let snapshot = sync::run(handle, &peers).await?;
            handle.install(snapshot).await?;
            if handle.status().await.is_none() {
                return Err(NodeError::Sync("installed node list does not include this node".into()));
            }
            Ok(())
        }
        .await;
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MAX_SYNC_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, "sync failed, retrying");
                tokio::time::sleep(handle.quarter()).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Tell the network this node has synced. Under direct admission activation
/// alone carries that.
async fn announce_sync(handle: &NodeHandle) -> Result<(), NodeError> {
    if handle.config.cycle.join_strategy != JoinStrategy::V2 {
        return Ok(());
    }
    let batch = {
        let mut engine = handle.engine.lock().await;
        let mut outputs = engine.announce_sync_started()?;
        outputs.extend(engine.announce_sync_finished()?);
        Batch::new(&engine, outputs)
    };
    tracing::info!("synced, announcing");
    handle.dispatch(batch);
    Ok(())
}

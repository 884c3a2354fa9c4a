//! How many nodes the network admits or sheds in one cycle.
//!
//! The target is the previous record's `desired`. Each mode caps the step so
//! the network grows and shrinks gradually.

use shoal_types::{CycleParams, CycleRecord, NetworkMode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToAccept {
    pub add: u32,
    pub remove: u32,
}

fn capped(wanted: u32, base: u32, fraction: f64) -> u32 {
    let cap = ((base as f64 * fraction).floor() as u32).max(1);
    wanted.min(cap)
}

/// Admission and removal capacity for the cycle following `prev`.
pub fn calculate_to_accept(params: &CycleParams, prev: &CycleRecord) -> ToAccept {
    let active = prev.active;
    let total = prev.active + prev.syncing;
    let target = prev.desired;

    match prev.mode {
        NetworkMode::Forming => ToAccept {
            add: target.saturating_sub(total),
            remove: 0,
        },
        NetworkMode::Processing => {
            let add = if total < target {
                capped(target - total, active, params.processing_add_fraction)
            } else {
                0
            };
            let remove = if active > target {
                capped(active - target, active, params.processing_remove_fraction)
            } else {
                0
            };
            ToAccept { add, remove }
        }
        NetworkMode::Safety => {
            let goal = (params.min_nodes as f64 * params.safety_overshoot).ceil() as u32;
            let add = if total < goal {
                capped(goal - total, active, params.safety_add_fraction)
            } else {
                0
            };
            ToAccept { add, remove: 0 }
        }
        NetworkMode::Recovery => {
            let add = if total < target {
                capped(target - total, total, params.recovery_add_fraction)
            } else {
                0
            };
            ToAccept { add, remove: 0 }
        }
        NetworkMode::Shutdown => ToAccept::default(),
    }
}

//! Network mode, driven by the active count relative to `min_nodes`.

use serde_json::Value;
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{GossipPayload, SchemaError};
use shoal_types::{CycleParams, CycleRecord, NetworkMode};

use crate::error::ConsensusError;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[FieldSpec::req("mode", FieldKind::Str)];

/// Mode of the next record given the previous mode and active count.
pub fn next_mode(params: &CycleParams, prev: NetworkMode, active: u32) -> NetworkMode {
    let min = params.min_nodes.max(1) as f64;
    let ratio = active as f64 / min;
    let shutdown = ratio < params.shutdown_fraction;
    let recovery = ratio < params.recovery_fraction;
    let safety = ratio < params.safety_fraction;
    let full = ratio >= 1.0;

    match prev {
        NetworkMode::Forming if full => NetworkMode::Processing,
        NetworkMode::Forming => NetworkMode::Forming,
        NetworkMode::Processing | NetworkMode::Safety if recovery => NetworkMode::Recovery,
        NetworkMode::Processing if safety => NetworkMode::Safety,
        NetworkMode::Processing => NetworkMode::Processing,
        NetworkMode::Safety if !safety => NetworkMode::Processing,
        NetworkMode::Safety => NetworkMode::Safety,
        NetworkMode::Recovery if shutdown => NetworkMode::Shutdown,
        NetworkMode::Recovery if full => NetworkMode::Processing,
        NetworkMode::Recovery => NetworkMode::Recovery,
        NetworkMode::Shutdown if !recovery => NetworkMode::Recovery,
        NetworkMode::Shutdown => NetworkMode::Shutdown,
    }
}

#[derive(Debug, Default)]
pub struct Modes;

impl Modes {
    pub fn new() -> Self {
        Self
    }
}

impl Submodule for Modes {
    fn name(&self) -> &'static str {
        "modes"
    }

    fn routes(&self) -> &'static [&'static str] {
        &[]
    }

    fn reset(&mut self, _counter: u64) {}

    fn handle_gossip(&mut self, _payload: &GossipPayload, _ctx: &CycleContext<'_>) -> GossipVerdict {
        GossipVerdict::rejected("modes takes no gossip")
    }

    fn get_txs(&self, _txs: &mut CycleTxs) {}

    fn update_record(
        &self,
        _txs: &CycleTxs,
        record: &mut CycleRecord,
        prev: Option<&CycleRecord>,
        ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        record.mode = match prev {
            None => NetworkMode::Forming,
            Some(prev) => {
                let mode = next_mode(ctx.params, prev.mode, prev.active);
                if mode != prev.mode {
                    tracing::info!(from = %prev.mode, to = %mode, active = prev.active, "network mode change");
                }
                mode
            }
        };
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> CycleParams {
        CycleParams::default()
    }

    #[test]
    fn processing_with_forty_percent_goes_to_recovery() {
        // 0.4 * 15 = 6
        assert_eq!(next_mode(&p(), NetworkMode::Processing, 6), NetworkMode::Recovery);
    }

    #[test]
    fn processing_dips_into_safety() {
        assert_eq!(next_mode(&p(), NetworkMode::Processing, 13), NetworkMode::Safety);
        assert_eq!(next_mode(&p(), NetworkMode::Processing, 14), NetworkMode::Processing);
    }

    #[test]
    fn forming_waits_for_min_nodes() {
        assert_eq!(next_mode(&p(), NetworkMode::Forming, 14), NetworkMode::Forming);
        assert_eq!(next_mode(&p(), NetworkMode::Forming, 15), NetworkMode::Processing);
    }

    #[test]
    fn safety_recovers_or_degrades() {
        assert_eq!(next_mode(&p(), NetworkMode::Safety, 14), NetworkMode::Processing);
        assert_eq!(next_mode(&p(), NetworkMode::Safety, 10), NetworkMode::Safety);
        assert_eq!(next_mode(&p(), NetworkMode::Safety, 7), NetworkMode::Recovery);
    }

    #[test]
    fn recovery_and_shutdown_edges() {
        assert_eq!(next_mode(&p(), NetworkMode::Recovery, 4), NetworkMode::Shutdown);
        assert_eq!(next_mode(&p(), NetworkMode::Recovery, 10), NetworkMode::Recovery);
        assert_eq!(next_mode(&p(), NetworkMode::Recovery, 15), NetworkMode::Processing);
        assert_eq!(next_mode(&p(), NetworkMode::Shutdown, 7), NetworkMode::Shutdown);
        assert_eq!(next_mode(&p(), NetworkMode::Shutdown, 8), NetworkMode::Recovery);
    }
}

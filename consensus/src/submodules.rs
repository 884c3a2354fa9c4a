//! The registered submodules, in the order they write a record.
//!
//! Order matters: modes must be set before rotation reads it, and rotation
//! runs last so it can skip nodes already leaving for other reasons.

use serde_json::Value;
use shoal_messages::SchemaError;
use shoal_types::{CycleRecord, JoinStrategy};

use crate::active::Active;
use crate::apoptosis::Apoptosis;
use crate::autoscale::CycleAutoScale;
use crate::join::{admission_for, Admission};
use crate::lost::Lost;
use crate::lost_archivers::LostArchivers;
use crate::modes::Modes;
use crate::nodelist::Change;
use crate::rotation::Rotation;
use crate::service_queue::ServiceQueue;
use crate::submodule::Submodule;

pub const SUBMODULE_COUNT: usize = 9;

pub struct Submodules {
    pub join: Box<dyn Admission + Sync>,
    pub active: Active,
    pub autoscale: CycleAutoScale,
    pub modes: Modes,
    pub service_queue: ServiceQueue,
    pub lost_archivers: LostArchivers,
    pub lost: Lost,
    pub apoptosis: Apoptosis,
    pub rotation: Rotation,
}

impl Submodules {
    pub fn new(strategy: JoinStrategy) -> Self {
        Self {
            join: admission_for(strategy),
            active: Active::new(),
            autoscale: CycleAutoScale::new(),
            modes: Modes::new(),
            service_queue: ServiceQueue::new(),
            lost_archivers: LostArchivers::new(),
            lost: Lost::new(),
            apoptosis: Apoptosis::new(),
            rotation: Rotation::new(),
        }
    }

    pub fn all(&self) -> [&dyn Submodule; SUBMODULE_COUNT] {
        [
            self.join.as_submodule(),
            &self.active,
            &self.autoscale,
            &self.modes,
            &self.service_queue,
            &self.lost_archivers,
            &self.lost,
            &self.apoptosis,
            &self.rotation,
        ]
    }

    pub fn all_mut(&mut self) -> [&mut dyn Submodule; SUBMODULE_COUNT] {
        [
            self.join.as_submodule_mut(),
            &mut self.active,
            &mut self.autoscale,
            &mut self.modes,
            &mut self.service_queue,
            &mut self.lost_archivers,
            &mut self.lost,
            &mut self.apoptosis,
            &mut self.rotation,
        ]
    }

    /// The submodule that handles gossip on `route`.
    pub fn for_route_mut(&mut self, route: &str) -> Option<&mut dyn Submodule> {
        self.all_mut()
            .into_iter()
            .find(|s| s.routes().contains(&route))
    }

    pub fn reset(&mut self, counter: u64) {
        for sub in self.all_mut() {
            sub.reset(counter);
        }
    }

    /// Every node-list change `record` implies.
    pub fn parse(&self, record: &CycleRecord) -> Change {
        let mut change = Change::default();
        for sub in self.all() {
            change.merge(sub.parse_record(record));
        }
        change
    }

    pub fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        for sub in self.all() {
            sub.validate_record_types(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_messages::routes;

    #[test]
    fn every_gossip_route_has_one_owner() {
        let mut subs = Submodules::new(JoinStrategy::V2);
        let all_routes = [
            routes::GOSSIP_VALID_JOIN_REQUESTS,
            routes::GOSSIP_UNJOIN,
            routes::GOSSIP_SYNC_STARTED,
            routes::GOSSIP_SYNC_FINISHED,
            routes::GOSSIP_STANDBY_REFRESH,
            routes::GOSSIP_ACTIVE,
            routes::SCALING,
            routes::GOSSIP_ADDTX,
            routes::GOSSIP_REMOVETX,
            routes::LOST_ARCHIVER_UP,
            routes::LOST_ARCHIVER_DOWN,
            routes::LOST_DOWN,
            routes::LOST_UP,
            routes::APOPTOSIZE,
        ];
        for route in all_routes {
            let owners = subs.all().iter().filter(|s| s.routes().contains(&route)).count();
            assert_eq!(owners, 1, "{route}");
            assert!(subs.for_route_mut(route).is_some());
        }
        assert!(subs.for_route_mut(routes::GOSSIP_JOIN).is_none());
        assert!(Submodules::new(JoinStrategy::V1)
            .for_route_mut(routes::GOSSIP_JOIN)
            .is_some());
    }

    #[test]
    fn skeleton_record_passes_every_schema() {
        let subs = Submodules::new(JoinStrategy::V2);
        let record = CycleRecord::skeleton(
            shoal_types::NetworkId::Dev,
            0,
            shoal_types::Hash256::ZERO,
            0,
            60,
        );
        let value = serde_json::to_value(&record).unwrap();
        subs.validate_record_types(&value).unwrap();
    }
}

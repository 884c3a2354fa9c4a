//! Node admission.
//!
//! Two strategies fill `joinedConsensors`. [`v1::JoinV1`] digests valid
//! requests directly, best selection numbers first. [`v2::JoinV2`] parks them
//! in a persistent standby list and selects from it at Q2. Both implement
//! [`Admission`] and are chosen by [`JoinStrategy`].
//!
//! A `POST /join` runs in three steps so that the engine lock is never held
//! across network I/O: [`Admission::prevalidate`] under the lock, a
//! reachability probe without it, then [`Admission::commit`] under the lock
//! again, which inserts only if the request is still absent.

pub mod capacity;
pub mod selection;
pub mod v1;
pub mod v2;

use shoal_crypto::{curve_public_key, hash_obj, verify_obj, CryptoError};
use shoal_messages::{GossipPayload, JoinRequest, StandbyRefresh, UnjoinRequest};
use shoal_types::{
    CycleRecord, Hash256, JoinStrategy, JoinedConsensor, NetworkMode, NodeInfo, PublicKey, Signed,
    StandbyInfo,
};
use thiserror::Error;

use crate::submodule::{CycleContext, Submodule};

pub use capacity::{calculate_to_accept, ToAccept};
pub use selection::{cycle_seed, select_top, select_top_distinct};
pub use v1::JoinV1;
pub use v2::JoinV2;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("signature does not verify for the node's public key")]
    BadSignature,

    #[error("join request signed against a stale cycle marker")]
    StaleMarker,

    #[error("public key is already in the node list")]
    AlreadyJoined,

    #[error("external address {0} is already in use")]
    AddressInUse(String),

    #[error("request already pending")]
    AlreadyPending,

    #[error("curve public key does not match the signing key")]
    CurveKeyMismatch,

    #[error("node is unreachable: {0}")]
    Unreachable(String),

    #[error("not accepting join requests: {0}")]
    NotAccepting(String),

    #[error("public key is not on the standby list")]
    NotOnStandbyList,

    #[error("operation not supported by the {0:?} join strategy")]
    Unsupported(JoinStrategy),
}

impl JoinError {
    /// Whether the candidate should stop retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::BadSignature | Self::CurveKeyMismatch
        )
    }
}

/// The admission contract shared by both strategies.
pub trait Admission: Submodule {
    fn strategy(&self) -> JoinStrategy;

    fn as_submodule(&self) -> &dyn Submodule;

    fn as_submodule_mut(&mut self) -> &mut dyn Submodule;

    /// Checks that need no I/O. Run before the reachability probe.
    fn prevalidate(&self, req: &Signed<JoinRequest>, ctx: &CycleContext<'_>) -> Result<(), JoinError>;

    /// Insert a probed request if it is still absent. Returns the payload to
    /// gossip.
    fn commit(
        &mut self,
        req: Signed<JoinRequest>,
        ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError>;

    fn unjoin(
        &mut self,
        _req: Signed<UnjoinRequest>,
        _ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError> {
        Err(JoinError::Unsupported(self.strategy()))
    }

    fn standby_refresh(
        &mut self,
        _req: Signed<StandbyRefresh>,
        _ctx: &CycleContext<'_>,
    ) -> Result<GossipPayload, JoinError> {
        Err(JoinError::Unsupported(self.strategy()))
    }

    /// Q2 work. Only the standby strategy selects here.
    fn execute_selection(&mut self, _ctx: &CycleContext<'_>) {}

    /// Whether `pk` is waiting for admission.
    fn is_waiting(&self, pk: &PublicKey) -> bool;

    fn standby_list(&self) -> Vec<StandbyInfo> {
        Vec::new()
    }

    fn standby_hash(&self) -> Result<Hash256, CryptoError> {
        hash_obj(&self.standby_list())
    }

    /// Replace the standby list with one fetched during sync.
    fn install_standby(&mut self, _list: Vec<StandbyInfo>) {}
}

/// Checks every strategy applies to a join request.
pub fn validate_join_request(
    req: &Signed<JoinRequest>,
    ctx: &CycleContext<'_>,
) -> Result<(), JoinError> {
    let info = &req.body.node_info;
    if req.owner() != &info.public_key {
        return Err(JoinError::BadSignature);
    }
    verify_obj(req).map_err(|_| JoinError::BadSignature)?;
    if ctx.prev.is_some_and(|p| p.mode == NetworkMode::Shutdown) {
        return Err(JoinError::NotAccepting("network is shutting down".into()));
    }
    if !ctx.is_recent_marker(&req.body.cycle_marker) {
        return Err(JoinError::StaleMarker);
    }
    if ctx.nodes.get_by_pubkey(&info.public_key).is_some() {
        return Err(JoinError::AlreadyJoined);
    }
    if ctx
        .nodes
        .get_by_ip_port(&info.external_ip, info.external_port)
        .is_some()
    {
        return Err(JoinError::AddressInUse(info.external_addr()));
    }
    match curve_public_key(&info.public_key) {
        Ok(curve) if curve == info.curve_public_key => Ok(()),
        _ => Err(JoinError::CurveKeyMismatch),
    }
}

/// The `joinedConsensors` entry for a candidate accepted into `record`.
pub fn joined_consensor(info: &NodeInfo, join_request_timestamp: u64, record: &CycleRecord) -> JoinedConsensor {
    JoinedConsensor {
        id: shoal_crypto::node_id(&info.public_key, &record.previous),
        info: info.clone(),
        join_request_timestamp,
        cycle_joined: record.previous,
        counter_joined: record.counter,
    }
}

/// Build the configured strategy.
pub fn admission_for(strategy: JoinStrategy) -> Box<dyn Admission + Sync> {
    match strategy {
        JoinStrategy::V1 => Box::new(JoinV1::new()),
        JoinStrategy::V2 => Box::new(JoinV2::new()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archivers::ArchiverList;
    use crate::nodelist::NodeList;
    use shoal_crypto::{keypair_from_seed, sign_obj};
    use shoal_types::{CycleParams, KeyPair, NetworkId};

    pub(crate) fn candidate(seed: u8) -> KeyPair {
        keypair_from_seed(&[seed; 32])
    }

    pub(crate) fn join_request(kp: &KeyPair, marker: Hash256) -> Signed<JoinRequest> {
        let body = JoinRequest {
            node_info: NodeInfo {
                public_key: kp.public,
                curve_public_key: curve_public_key(&kp.public).unwrap(),
                external_ip: format!("10.9.{}.{}", kp.public.0[0], kp.public.0[1]),
                external_port: 9001,
                internal_ip: "127.0.0.1".into(),
                internal_port: 10001,
            },
            cycle_marker: marker,
            timestamp: 1_000,
            version: None,
        };
        sign_obj(body, kp).unwrap()
    }

    pub(crate) struct Fixture {
        pub params: CycleParams,
        pub nodes: NodeList,
        pub archivers: ArchiverList,
        pub prev: CycleRecord,
        pub marker: Hash256,
    }

    impl Fixture {
        pub fn new(mode: NetworkMode, active: u32, desired: u32) -> Self {
            let mut prev = CycleRecord::skeleton(NetworkId::Dev, 4, Hash256::new([3; 32]), 0, 60);
            prev.mode = mode;
            prev.active = active;
            prev.desired = desired;
            Self {
                params: CycleParams::default(),
                nodes: NodeList::new(),
                archivers: ArchiverList::new(),
                prev,
                marker: Hash256::new([4; 32]),
            }
        }

        pub fn ctx(&self) -> CycleContext<'_> {
            CycleContext {
                params: &self.params,
                network_id: NetworkId::Dev,
                nodes: &self.nodes,
                archivers: &self.archivers,
                prev: Some(&self.prev),
                prev_marker: Some(self.marker),
                counter: self.prev.counter + 1,
                quarter: None,
                self_id: None,
            }
        }
    }

    #[test]
    fn accepts_request_on_tip_or_previous_marker() {
        let fx = Fixture::new(NetworkMode::Processing, 20, 20);
        let kp = candidate(1);
        assert!(validate_join_request(&join_request(&kp, fx.marker), &fx.ctx()).is_ok());
        assert!(validate_join_request(&join_request(&kp, fx.prev.previous), &fx.ctx()).is_ok());
        assert_eq!(
            validate_join_request(&join_request(&kp, Hash256::new([9; 32])), &fx.ctx()),
            Err(JoinError::StaleMarker)
        );
    }

    #[test]
    fn rejects_foreign_signer() {
        let fx = Fixture::new(NetworkMode::Processing, 20, 20);
        let mut req = join_request(&candidate(1), fx.marker);
        req.sign.owner = candidate(2).public;
        let err = validate_join_request(&req, &fx.ctx()).unwrap_err();
        assert_eq!(err, JoinError::BadSignature);
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_mismatched_curve_key() {
        let fx = Fixture::new(NetworkMode::Processing, 20, 20);
        let kp = candidate(1);
        let mut body = join_request(&kp, fx.marker).body;
        body.node_info.curve_public_key = shoal_types::CurvePublicKey([0; 32]);
        let req = sign_obj(body, &kp).unwrap();
        assert_eq!(
            validate_join_request(&req, &fx.ctx()),
            Err(JoinError::CurveKeyMismatch)
        );
    }

    #[test]
    fn joined_consensor_id_uses_previous_marker() {
        let fx = Fixture::new(NetworkMode::Processing, 20, 20);
        let req = join_request(&candidate(1), fx.marker);
        let record = CycleRecord::skeleton(NetworkId::Dev, 5, fx.marker, 60, 60);
        let jc = joined_consensor(&req.body.node_info, 1_000, &record);
        assert_eq!(jc.id, shoal_crypto::node_id(&candidate(1).public, &fx.marker));
        assert_eq!(jc.counter_joined, 5);
        assert_eq!(jc.cycle_joined, fx.marker);
    }
}

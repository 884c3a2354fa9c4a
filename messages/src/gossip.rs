//! Flood-gossip envelope.
//!
//! On the wire a gossip message is
//! `{ "type": <route>, "payload": {...signed body...}, "tracker", "sender", "origin" }`.
//! The payload stays raw JSON inside the envelope: it is schema-checked for its
//! route, then decoded into a [`GossipPayload`]. Forwarding re-sends the raw
//! payload untouched so signatures keep verifying downstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_types::{NetworkTx, NodeId, PublicKey, Signed};

use crate::error::MessageError;
use crate::payloads::*;
use crate::routes;
use crate::schema::{self, FieldSpec};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GossipEnvelope {
    #[serde(rename = "type")]
    pub route: String,
    pub payload: Value,
    /// Identifier chosen by the origin, carried unchanged through every hop.
    pub tracker: String,
    /// Node that sent this copy.
    pub sender: NodeId,
    /// Node that first gossiped the payload.
    pub origin: NodeId,
}

impl GossipEnvelope {
    /// Envelope for a payload originated by `self_id`.
    pub fn originate(
        payload: &GossipPayload,
        tracker: String,
        self_id: NodeId,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            route: payload.route().to_string(),
            payload: payload.to_value()?,
            tracker,
            sender: self_id,
            origin: self_id,
        })
    }

    /// The same message as re-sent by `self_id`.
    pub fn forwarded_by(&self, self_id: NodeId) -> Self {
        Self {
            sender: self_id,
            ..self.clone()
        }
    }

    /// Schema-check and decode the payload for this envelope's route.
    pub fn decode(&self) -> Result<GossipPayload, MessageError> {
        GossipPayload::decode(&self.route, &self.payload)
    }
}

macro_rules! gossip_payloads {
    ($($variant:ident($body:ty) => $route:path, $schema:path;)*) => {
        /// Every payload that travels by flood gossip.
        #[derive(Clone, Debug, PartialEq)]
        pub enum GossipPayload {
            $($variant(Signed<$body>),)*
        }

        impl GossipPayload {
            pub fn route(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $route,)*
                }
            }

            /// Public key that signed the payload.
            pub fn signer(&self) -> &PublicKey {
                match self {
                    $(Self::$variant(s) => s.owner(),)*
                }
            }

            pub fn to_value(&self) -> Result<Value, MessageError> {
                Ok(match self {
                    $(Self::$variant(s) => serde_json::to_value(s)?,)*
                })
            }

            /// Field table for a route, if the route is known.
            pub fn schema_for(route: &str) -> Option<&'static [FieldSpec]> {
                match route {
                    $($route => Some($schema),)*
                    _ => None,
                }
            }

            pub fn decode(route: &str, value: &Value) -> Result<Self, MessageError> {
                let fields = Self::schema_for(route)
                    .ok_or_else(|| MessageError::UnknownRoute(route.to_string()))?;
                schema::validate(value, fields)?;
                match route {
                    $($route => Ok(Self::$variant(serde_json::from_value(value.clone())?)),)*
                    other => Err(MessageError::UnknownRoute(other.to_string())),
                }
            }
        }
    };
}

gossip_payloads! {
    Join(JoinRequest) => routes::GOSSIP_JOIN, schema::JOIN_REQUEST;
    ValidJoinRequest(JoinRequest) => routes::GOSSIP_VALID_JOIN_REQUESTS, schema::JOIN_REQUEST;
    Unjoin(UnjoinRequest) => routes::GOSSIP_UNJOIN, schema::UNJOIN;
    SyncStarted(SyncStarted) => routes::GOSSIP_SYNC_STARTED, schema::SYNC_STATUS;
    SyncFinished(SyncFinished) => routes::GOSSIP_SYNC_FINISHED, schema::SYNC_STATUS;
    StandbyRefresh(StandbyRefresh) => routes::GOSSIP_STANDBY_REFRESH, schema::STANDBY_REFRESH;
    Active(ActiveRequest) => routes::GOSSIP_ACTIVE, schema::ACTIVE;
    Scaling(ScaleRequest) => routes::SCALING, schema::SCALING;
    AddTx(NetworkTx) => routes::GOSSIP_ADDTX, schema::ADD_TX;
    RemoveTx(RemoveTx) => routes::GOSSIP_REMOVETX, schema::REMOVE_TX;
    LostDown(LostReport) => routes::LOST_DOWN, schema::LOST_DOWN;
    LostUp(LostUp) => routes::LOST_UP, schema::LOST_UP;
    LostArchiverDown(LostArchiverDown) => routes::LOST_ARCHIVER_DOWN, schema::LOST_ARCHIVER_DOWN;
    LostArchiverUp(LostArchiverUp) => routes::LOST_ARCHIVER_UP, schema::LOST_ARCHIVER_UP;
    Apoptosize(ApoptosisProposal) => routes::APOPTOSIZE, schema::APOPTOSIS;
}

impl GossipPayload {
    /// Cycle a payload explicitly targets, for routes that are accepted
    /// outside the usual Q1-Q2 window.
    pub fn target_cycle(&self) -> Option<u64> {
        match self {
            Self::Apoptosize(s) => Some(s.body.when),
            _ => None,
        }
    }
}

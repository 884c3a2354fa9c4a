//! Signed-object envelope.
//!
//! Every gossip payload is a JSON object carrying a `sign` field:
//! `{ ...body fields..., "sign": { "owner": <pubkey>, "sig": <signature> } }`.
//! The signature covers the canonical JSON encoding of the body alone.

use serde::{Deserialize, Serialize};

use crate::keys::{PublicKey, Signature};

/// Signature block attached to a signed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sign {
    pub owner: PublicKey,
    pub sig: Signature,
}

/// A body of type `T` together with its owner's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    #[serde(flatten)]
    pub body: T,
    pub sign: Sign,
}

impl<T> Signed<T> {
    /// Public key that produced the signature.
    pub fn owner(&self) -> &PublicKey {
        &self.sign.owner
    }
}

//! Cryptographic primitives for the Shoal network.
//!
//! - **Ed25519** for signing gossip payloads and join requests
//! - **Blake2b** for cycle markers, node ids, selection numbers and list hashes
//! - **X25519** public keys derived from the node's Ed25519 identity
//! - Canonical JSON encoding, the byte form everything above is computed over

pub mod error;
pub mod hash;
pub mod keys;
pub mod sign;

pub use error::CryptoError;
pub use hash::{
    blake2b_256, blake2b_256_multi, canonical_json, hash_obj, node_id, selection_num,
};
pub use keys::{curve_public_key, generate_keypair, keypair_from_seed, public_from_private};
pub use sign::{sign_message, sign_obj, verify_obj, verify_signature};

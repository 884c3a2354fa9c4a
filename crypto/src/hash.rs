//! Blake2b hashing for markers, node ids and content hashes.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::Serialize;
use shoal_types::{CycleMarker, Hash256, NodeId, PublicKey, SelectionNum};

use crate::error::CryptoError;

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Canonical JSON bytes of a value: object keys sorted, no whitespace.
///
/// Going through `serde_json::Value` sorts map keys, so the encoding does not
/// depend on struct field declaration order.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CryptoError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&v)?)
}

/// Content hash of any serializable value.
pub fn hash_obj<T: Serialize + ?Sized>(value: &T) -> Result<Hash256, CryptoError> {
    Ok(Hash256::new(blake2b_256(&canonical_json(value)?)))
}

/// Node id for a key accepted in the cycle with the given marker.
pub fn node_id(public_key: &PublicKey, cycle_marker: &CycleMarker) -> NodeId {
    Hash256::new(blake2b_256_multi(&[
        public_key.as_bytes(),
        cycle_marker.as_bytes(),
    ]))
}

/// Selection score of a candidate: `blake2b(seed ‖ public key)`.
///
/// The seed must be fixed only after the candidate's request is recorded,
/// otherwise the candidate can compute its own rank before submitting.
/// Nothing in the signed request other than the key feeds the score.
pub fn selection_num(seed: &Hash256, public_key: &PublicKey) -> SelectionNum {
    Hash256::new(blake2b_256_multi(&[seed.as_bytes(), public_key.as_bytes()]))
}

//! Ed25519 key generation and the derived X25519 key.

use shoal_types::{CurvePublicKey, KeyPair, PrivateKey, PublicKey};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// Generate a new Ed25519 key pair from a secure random source.
pub fn generate_keypair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    KeyPair {
        public: PublicKey(verifying_key.to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    PublicKey(signing_key.verifying_key().to_bytes())
}

/// Derive a key pair from a 32-byte seed (deterministic).
///
/// Used for operator-supplied node keys and for simulated nodes in tests.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();
    KeyPair {
        public: PublicKey(verifying_key.to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// The X25519 public key a node advertises as its `curvePublicKey`.
///
/// Uses the birational map from Edwards to Montgomery form.
pub fn curve_public_key(public: &PublicKey) -> Result<CurvePublicKey, CryptoError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(public.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(CurvePublicKey(verifying_key.to_montgomery().to_bytes()))
}

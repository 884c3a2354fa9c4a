//! Ed25519 signing of raw messages and of signed-object envelopes.

use serde::Serialize;
use shoal_types::{KeyPair, PrivateKey, PublicKey, Sign, Signature, Signed};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::CryptoError;
use crate::hash::canonical_json;

/// Sign a message with a private key, returning the signature.
pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    Signature(signing_key.sign(message).to_bytes())
}

/// Verify a signature against a message and public key.
///
/// Returns `true` if the signature is valid, `false` otherwise.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &dalek_sig).is_ok()
}

/// Sign the canonical JSON of `body` and wrap it in an envelope.
pub fn sign_obj<T: Serialize>(body: T, keys: &KeyPair) -> Result<Signed<T>, CryptoError> {
    let bytes = canonical_json(&body)?;
    let sig = sign_message(&bytes, &keys.private);
    Ok(Signed {
        body,
        sign: Sign {
            owner: keys.public,
            sig,
        },
    })
}

/// Check that the envelope's signature covers its body and owner.
pub fn verify_obj<T: Serialize>(signed: &Signed<T>) -> Result<(), CryptoError> {
    let bytes = canonical_json(&signed.body)?;
    if verify_signature(&bytes, &signed.sign.sig, &signed.sign.owner) {
        Ok(())
    } else {
        Err(CryptoError::BadSignature(signed.sign.owner.to_hex()))
    }
}

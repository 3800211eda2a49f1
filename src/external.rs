//! Boundary collaborators consumed by the engine: time, signature
//! verification, and the on-ledger effect applier.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::account::types::{AccountId, PublicKey};
use crate::error::EffectError;
use crate::request::types::Action;

/// Time source, injectable so tests can drive expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Opaque cryptographic capability; the engine never inspects key material
pub trait SignatureVerifier: Send + Sync {
    fn verify_signature(&self, public_key: &PublicKey, payload: &[u8], signature: &[u8]) -> bool;
}

/// ed25519 verification over hex-encoded public keys
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify_signature(&self, public_key: &PublicKey, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = hex::decode(public_key) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(payload, &signature).is_ok()
    }
}

/// Canonical digest signed by callers of the engine's mutating operations.
/// Binds the account, the operation name, and its distinguishing detail.
pub fn operation_digest(account_id: &AccountId, operation: &str, detail: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);
    hasher.update(detail);
    hasher.finalize().to_vec()
}

/// Performs the actual on-ledger state change. May fail transiently
/// (network/consensus); the engine retries with bounded backoff.
pub trait EffectApplier: Send + Sync {
    fn apply_action(&self, account_id: &AccountId, action: &Action) -> Result<(), EffectError>;
}

/// Applier for deployments where key bookkeeping is the whole ledger
/// (everything already happens inside the engine's own state).
pub struct LocalApplier;

impl EffectApplier for LocalApplier {
    fn apply_action(&self, _account_id: &AccountId, _action: &Action) -> Result<(), EffectError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn test_ed25519_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());

        let payload = operation_digest(&"alice".to_string(), "confirm", &7u64.to_le_bytes());
        let signature = signing_key.sign(&payload);

        let verifier = Ed25519Verifier;
        assert!(verifier.verify_signature(&public_key, &payload, &signature.to_bytes()));

        // Tampered payload fails
        let other = operation_digest(&"alice".to_string(), "confirm", &8u64.to_le_bytes());
        assert!(!verifier.verify_signature(&public_key, &other, &signature.to_bytes()));
    }

    #[test]
    fn test_malformed_key_rejected() {
        let verifier = Ed25519Verifier;
        assert!(!verifier.verify_signature(&"not-hex".to_string(), b"payload", &[0u8; 64]));
        assert!(!verifier.verify_signature(&"aabb".to_string(), b"payload", &[0u8; 64]));
    }

    #[test]
    fn test_digest_separates_fields() {
        let a = operation_digest(&"alice".to_string(), "confirm", b"1");
        let b = operation_digest(&"alice".to_string(), "cancel", b"1");
        let c = operation_digest(&"bob".to_string(), "confirm", b"1");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}

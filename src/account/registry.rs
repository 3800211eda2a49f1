//! Access-key registry: which keys are authorized on an account and what
//! they are allowed to do

use tracing::{debug, info};

use super::types::{AccessKey, Account, Capability, PublicKey};
use crate::error::MultisigError;

/// Outcome of one batch-revocation pass. Callers repeat until
/// `remaining == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub revoked: usize,
    pub remaining: usize,
}

/// Tracks authorized keys, their permission scope, and add/delete operations.
///
/// Stateless over the account it operates on; all key material lives on the
/// `Account` itself so snapshots stay self-contained.
#[derive(Debug, Default, Clone)]
pub struct AccessKeyRegistry;

impl AccessKeyRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Add a key to the account. Fails if the public key is already present.
    pub fn authorize(&self, account: &mut Account, key: AccessKey) -> Result<(), MultisigError> {
        if account.keys.contains_key(&key.public_key) {
            return Err(MultisigError::DuplicateKey(key.public_key));
        }
        info!(
            account = %account.account_id,
            key = %key.public_key,
            full_access = key.is_full_access(),
            "key authorized"
        );
        account.keys.insert(key.public_key.clone(), key);
        Ok(())
    }

    /// Add several keys in one call, failing on the first duplicate without
    /// applying any of them.
    pub fn authorize_batch(
        &self,
        account: &mut Account,
        keys: Vec<AccessKey>,
    ) -> Result<(), MultisigError> {
        for key in &keys {
            if account.keys.contains_key(&key.public_key) {
                return Err(MultisigError::DuplicateKey(key.public_key.clone()));
            }
        }
        for key in keys {
            account.keys.insert(key.public_key.clone(), key);
        }
        Ok(())
    }

    /// Remove a key. The last full-access key can never be removed.
    pub fn revoke(
        &self,
        account: &mut Account,
        public_key: &PublicKey,
    ) -> Result<(), MultisigError> {
        let key = account
            .keys
            .get(public_key)
            .ok_or_else(|| MultisigError::KeyNotFound(public_key.clone()))?;

        if key.is_full_access() && account.full_access_count() == 1 {
            return Err(MultisigError::LastKeyViolation);
        }

        account.keys.remove(public_key);
        info!(account = %account.account_id, key = %public_key, "key revoked");
        Ok(())
    }

    /// Revoke up to `limit` keys not named in `keep`, in one pass.
    ///
    /// The last full-access key is silently retained even when not
    /// whitelisted; it is never counted as remaining work.
    pub fn revoke_batch(
        &self,
        account: &mut Account,
        keep: &[PublicKey],
        limit: usize,
    ) -> BatchOutcome {
        let candidates: Vec<PublicKey> = account
            .keys
            .values()
            .filter(|k| !keep.contains(&k.public_key))
            .filter(|k| !(k.is_full_access() && account.full_access_count() == 1))
            .map(|k| k.public_key.clone())
            .collect();

        let mut revoked = 0;
        for public_key in candidates.iter().take(limit) {
            // Re-check the invariant per removal: earlier removals in this
            // pass may have left a single full-access key behind.
            if self.revoke(account, public_key).is_ok() {
                revoked += 1;
            }
        }

        let remaining = account
            .keys
            .values()
            .filter(|k| !keep.contains(&k.public_key))
            .filter(|k| !(k.is_full_access() && account.full_access_count() == 1))
            .count();

        debug!(
            account = %account.account_id,
            revoked,
            remaining,
            "batch revocation pass"
        );
        BatchOutcome { revoked, remaining }
    }

    /// Whether `signer` is an authorized key holding `capability`.
    pub fn is_authorized_signer(
        &self,
        account: &Account,
        signer: &PublicKey,
        capability: Capability,
    ) -> bool {
        account
            .keys
            .get(signer)
            .map(|key| key.has_capability(capability))
            .unwrap_or(false)
    }

    /// Replay protection: bump the signer key's nonce on each use.
    pub fn touch_nonce(&self, account: &mut Account, signer: &PublicKey) {
        if let Some(key) = account.keys.get_mut(signer) {
            key.nonce += 1;
        }
    }
}

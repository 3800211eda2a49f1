//! Confirmation policy: how many confirmations a request needs and whether
//! it has them.
//!
//! Kept behind a trait so the threshold rule can evolve (stake-weighted,
//! role-weighted) without touching request bookkeeping.

use crate::account::registry::AccessKeyRegistry;
use crate::account::types::{Account, Capability};
use crate::error::MultisigError;
use crate::request::types::Request;

pub trait ConfirmationPolicy: Send + Sync {
    /// Confirmations required before a request on this account is ready.
    /// Must be >= 1 and <= the number of confirm-capable keys.
    fn required_confirmations(&self, account: &Account) -> Result<u32, MultisigError>;

    /// Whether the request's distinct, currently-authorized confirmers reach
    /// the threshold.
    fn is_ready(&self, request: &Request, account: &Account) -> Result<bool, MultisigError>;
}

/// Fixed M-of-N threshold, per-account override with a configured default
pub struct ThresholdPolicy {
    default_threshold: u32,
    registry: AccessKeyRegistry,
}

impl ThresholdPolicy {
    pub fn new(default_threshold: u32) -> Self {
        Self {
            default_threshold,
            registry: AccessKeyRegistry::new(),
        }
    }
}

impl ConfirmationPolicy for ThresholdPolicy {
    fn required_confirmations(&self, account: &Account) -> Result<u32, MultisigError> {
        let required = account.threshold.unwrap_or(self.default_threshold);
        if required == 0 {
            return Err(MultisigError::ThresholdNotConfigured(
                "threshold must be at least 1".into(),
            ));
        }
        let confirmers = account.confirmer_count() as u32;
        if required > confirmers {
            return Err(MultisigError::ThresholdNotConfigured(format!(
                "threshold {} exceeds {} confirm-capable keys",
                required, confirmers
            )));
        }
        Ok(required)
    }

    fn is_ready(&self, request: &Request, account: &Account) -> Result<bool, MultisigError> {
        let required = self.required_confirmations(account)?;

        // Each confirmer is re-verified against the current key set, so a
        // revoked key's earlier confirmation stops counting.
        let confirmed = request
            .confirmations
            .iter()
            .filter(|&signer| {
                self.registry
                    .is_authorized_signer(account, signer, Capability::Confirm)
                    || self.registry.is_authorized_signer(
                        account,
                        signer,
                        Capability::AddRequestAndConfirm,
                    )
            })
            .count() as u32;

        Ok(confirmed >= required)
    }
}

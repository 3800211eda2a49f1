//! Multisig engine: orchestrates the registry, ledger, and policy
//!
//! Accepts proposed actions from authorized signers, collects confirmations,
//! and drives the request state machine:
//! `Pending -> Ready -> Executed`, `Pending -> Expired`,
//! `Pending|Ready -> Cancelled`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::account::registry::{AccessKeyRegistry, BatchOutcome};
use crate::account::types::{AccessKey, Account, AccountId, Capability, KeyScope, PublicKey};
use crate::config::EngineConfig;
use crate::error::{EffectError, MultisigError};
use crate::external::{operation_digest, Clock, EffectApplier, SignatureVerifier};
use crate::policy::ConfirmationPolicy;
use crate::request::ledger::RequestLedger;
use crate::request::types::{Action, Request, RequestId, RequestStatus};
use crate::storage::Persistence;

/// Signer identity plus a signature over the operation's canonical digest
#[derive(Debug, Clone)]
pub struct SignerProof {
    pub public_key: PublicKey,
    pub signature: Vec<u8>,
}

/// Canonical payload a caller signs when submitting `action`
pub fn submit_payload(account_id: &AccountId, action: &Action) -> Result<Vec<u8>, MultisigError> {
    let detail = bincode::serialize(action).map_err(|e| MultisigError::Storage(e.to_string()))?;
    Ok(operation_digest(account_id, "submit", &detail))
}

/// Canonical payload for confirming `request_id`
pub fn confirm_payload(account_id: &AccountId, request_id: RequestId) -> Vec<u8> {
    operation_digest(account_id, "confirm", &request_id.to_le_bytes())
}

/// Canonical payload for cancelling `request_id`
pub fn cancel_payload(account_id: &AccountId, request_id: RequestId) -> Vec<u8> {
    operation_digest(account_id, "cancel", &request_id.to_le_bytes())
}

/// Canonical payload for owner-level key administration
pub fn admin_payload(account_id: &AccountId, operation: &str) -> Vec<u8> {
    operation_digest(account_id, operation, &[])
}

pub struct MultisigEngine {
    accounts: Mutex<HashMap<AccountId, Account>>,
    registry: AccessKeyRegistry,
    ledger: RequestLedger,
    policy: Box<dyn ConfirmationPolicy>,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn SignatureVerifier>,
    applier: Arc<dyn EffectApplier>,
    storage: Option<Arc<dyn Persistence>>,
    config: EngineConfig,
}

impl MultisigEngine {
    pub fn new(
        config: EngineConfig,
        policy: Box<dyn ConfirmationPolicy>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn SignatureVerifier>,
        applier: Arc<dyn EffectApplier>,
    ) -> Self {
        let ledger = RequestLedger::new(config.expiry_window());
        Self {
            accounts: Mutex::new(HashMap::new()),
            registry: AccessKeyRegistry::new(),
            ledger,
            policy,
            clock,
            verifier,
            applier,
            storage: None,
            config,
        }
    }

    /// Create with a storage backend, reloading all persisted accounts so
    /// Pending/Ready requests survive a restart.
    pub fn with_storage(
        config: EngineConfig,
        policy: Box<dyn ConfirmationPolicy>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn SignatureVerifier>,
        applier: Arc<dyn EffectApplier>,
        storage: Arc<dyn Persistence>,
    ) -> Result<Self, MultisigError> {
        let mut engine = Self::new(config, policy, clock, verifier, applier);
        let restored = storage.load_all()?;
        {
            let mut accounts = engine.accounts.lock().expect("account map lock poisoned");
            for account in restored {
                accounts.insert(account.account_id.clone(), account);
            }
            if !accounts.is_empty() {
                info!(count = accounts.len(), "restored accounts from storage");
            }
        }
        engine.storage = Some(storage);
        Ok(engine)
    }

    // --- Account lifecycle ---

    /// Register a new account. The initial key must be full-access so the
    /// account never exists without one.
    pub fn create_account(
        &self,
        account_id: impl Into<AccountId>,
        initial_key: AccessKey,
    ) -> Result<Account, MultisigError> {
        let account_id = account_id.into();
        if !initial_key.is_full_access() {
            return Err(MultisigError::LastKeyViolation);
        }
        let mut accounts = self.accounts.lock().expect("account map lock poisoned");
        if accounts.contains_key(&account_id) {
            return Err(MultisigError::AccountExists(account_id));
        }
        let account = Account::new(account_id.clone(), initial_key, self.clock.now());
        self.persist(&account)?;
        accounts.insert(account_id, account.clone());
        info!(account = %account.account_id, "account created");
        Ok(account)
    }

    /// Snapshot of an account's current state
    pub fn account(&self, account_id: &AccountId) -> Result<Account, MultisigError> {
        let accounts = self.accounts.lock().expect("account map lock poisoned");
        accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| MultisigError::UnknownAccount(account_id.clone()))
    }

    // --- Owner-level key administration (full-access key required) ---

    /// Set or clear the per-account confirmation threshold override
    pub fn set_threshold(
        &self,
        account_id: &AccountId,
        owner: &SignerProof,
        threshold: Option<u32>,
    ) -> Result<(), MultisigError> {
        self.with_account(account_id, |engine, account| {
            engine.verify_owner(account, owner, &admin_payload(account_id, "set_threshold"))?;
            if let Some(t) = threshold {
                let confirmers = account.confirmer_count() as u32;
                if t == 0 || t > confirmers {
                    return Err(MultisigError::ThresholdNotConfigured(format!(
                        "threshold {} not satisfiable by {} confirmers",
                        t, confirmers
                    )));
                }
            }
            account.threshold = threshold;
            engine.registry.touch_nonce(account, &owner.public_key);
            Ok(())
        })
    }

    /// Seed a batch of confirmation keys, each carrying the four multisig
    /// capabilities scoped to the account itself
    pub fn seed_keys(
        &self,
        account_id: &AccountId,
        owner: &SignerProof,
        public_keys: Vec<PublicKey>,
    ) -> Result<usize, MultisigError> {
        self.with_account(account_id, |engine, account| {
            engine.verify_owner(account, owner, &admin_payload(account_id, "seed_keys"))?;
            let count = public_keys.len();
            let keys = public_keys
                .into_iter()
                .map(|pk| AccessKey::multisig(pk, account_id.clone()))
                .collect();
            engine.registry.authorize_batch(account, keys)?;
            engine.registry.touch_nonce(account, &owner.public_key);
            Ok(count)
        })
    }

    /// One bounded pass of non-whitelisted key revocation; call until
    /// `remaining == 0`
    pub fn revoke_batch(
        &self,
        account_id: &AccountId,
        owner: &SignerProof,
        keep: &[PublicKey],
        limit: usize,
    ) -> Result<BatchOutcome, MultisigError> {
        self.with_account(account_id, |engine, account| {
            engine.verify_owner(account, owner, &admin_payload(account_id, "revoke_batch"))?;
            let outcome = engine.registry.revoke_batch(account, keep, limit);
            engine.registry.touch_nonce(account, &owner.public_key);
            Ok(outcome)
        })
    }

    // --- Request lifecycle ---

    /// Propose an action. Idempotent: an identical open action returns the
    /// existing request id. A signer holding `add_request_and_confirm`
    /// implicitly confirms on submission.
    pub fn submit(
        &self,
        account_id: &AccountId,
        proof: &SignerProof,
        action: Action,
    ) -> Result<(RequestId, RequestStatus), MultisigError> {
        let payload = submit_payload(account_id, &action)?;
        self.with_account(account_id, |engine, account| {
            let can_add = engine.registry.is_authorized_signer(
                account,
                &proof.public_key,
                Capability::AddRequest,
            ) || engine.registry.is_authorized_signer(
                account,
                &proof.public_key,
                Capability::AddRequestAndConfirm,
            );
            if !can_add {
                return Err(MultisigError::UnauthorizedSigner {
                    signer: proof.public_key.clone(),
                    capability: Capability::AddRequest.method_name().into(),
                });
            }
            engine.verify_signature(account, proof, &payload)?;
            engine.validate_action(account, &proof.public_key, &action)?;
            // A request that can never reach its threshold is rejected up
            // front rather than left pending forever.
            engine.policy.required_confirmations(account)?;

            let now = engine.clock.now();
            let request_id = engine
                .ledger
                .submit(account, action, &proof.public_key, now);

            let mut status = account.pending[&request_id].status;
            if engine.registry.is_authorized_signer(
                account,
                &proof.public_key,
                Capability::AddRequestAndConfirm,
            ) {
                status = engine.ledger.confirm(
                    account,
                    request_id,
                    &proof.public_key,
                    now,
                    engine.policy.as_ref(),
                )?;
            }
            engine.registry.touch_nonce(account, &proof.public_key);
            Ok((request_id, status))
        })
    }

    /// Record a confirmation and report the resulting status
    pub fn confirm(
        &self,
        account_id: &AccountId,
        proof: &SignerProof,
        request_id: RequestId,
    ) -> Result<RequestStatus, MultisigError> {
        let payload = confirm_payload(account_id, request_id);
        self.with_account(account_id, |engine, account| {
            engine.verify_capability(account, proof, Capability::Confirm)?;
            engine.verify_signature(account, proof, &payload)?;
            let status = engine.ledger.confirm(
                account,
                request_id,
                &proof.public_key,
                engine.clock.now(),
                engine.policy.as_ref(),
            )?;
            engine.registry.touch_nonce(account, &proof.public_key);
            Ok(status)
        })
    }

    /// Cancel a request before execution. Terminal and irreversible.
    pub fn cancel(
        &self,
        account_id: &AccountId,
        proof: &SignerProof,
        request_id: RequestId,
    ) -> Result<RequestStatus, MultisigError> {
        let payload = cancel_payload(account_id, request_id);
        self.with_account(account_id, |engine, account| {
            engine.verify_capability(account, proof, Capability::DeleteRequest)?;
            engine.verify_signature(account, proof, &payload)?;
            let status = engine
                .ledger
                .cancel(account, request_id, engine.clock.now())?;
            engine.registry.touch_nonce(account, &proof.public_key);
            Ok(status)
        })
    }

    /// Request snapshot; lazy expiry applies
    pub fn get_request(
        &self,
        account_id: &AccountId,
        request_id: RequestId,
    ) -> Result<Request, MultisigError> {
        self.with_account(account_id, |engine, account| {
            engine.ledger.get(account, request_id, engine.clock.now())
        })
    }

    /// Purge every lapsed request on the account; returns the count
    pub fn purge_expired(&self, account_id: &AccountId) -> Result<usize, MultisigError> {
        self.with_account(account_id, |engine, account| {
            Ok(engine.ledger.purge_expired(account, engine.clock.now()))
        })
    }

    /// Execute a Ready request.
    ///
    /// The Pending/Ready -> Executed transition is atomic with respect to
    /// concurrent confirmations: the execution guard is set under the account
    /// lock, the external applier runs outside it, and finalization re-takes
    /// the lock. Transient applier failures are retried with bounded
    /// exponential backoff; on exhaustion the request stays Ready so a later
    /// call resumes without re-collecting confirmations.
    pub fn execute(
        &self,
        account_id: &AccountId,
        request_id: RequestId,
    ) -> Result<RequestStatus, MultisigError> {
        // Phase 1: claim the request under the lock
        let action = {
            let mut accounts = self.accounts.lock().expect("account map lock poisoned");
            let account = accounts
                .get_mut(account_id)
                .ok_or_else(|| MultisigError::UnknownAccount(account_id.clone()))?;

            let now = self.clock.now();
            let snapshot = self.ledger.get(account, request_id, now)?;

            if snapshot.executing {
                return Err(MultisigError::ExecutionInProgress(request_id));
            }
            if snapshot.status == RequestStatus::Expired {
                account.pending.remove(&request_id);
                self.persist(account)?;
                return Err(MultisigError::AlreadyExpired(request_id));
            }
            if snapshot.status != RequestStatus::Ready {
                // Threshold not met yet; nothing to do
                return Ok(snapshot.status);
            }
            // Feasibility is re-checked before the external effect fires so a
            // stale request (key since added/removed) fails here, not after.
            self.validate_action(account, &snapshot.submitter, &snapshot.action)?;

            let request = account
                .pending
                .get_mut(&request_id)
                .ok_or(MultisigError::UnknownRequest(request_id))?;
            request.executing = true;
            request.action.clone()
        };

        // Phase 2: external effect, outside the lock
        let outcome = self.apply_with_retry(account_id, &action);

        // Phase 3: finalize under the lock
        let mut accounts = self.accounts.lock().expect("account map lock poisoned");
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| MultisigError::UnknownAccount(account_id.clone()))?;

        match outcome {
            Err(err) => {
                if let Some(request) = account.pending.get_mut(&request_id) {
                    request.executing = false;
                }
                warn!(
                    account = %account_id,
                    request = request_id,
                    error = %err,
                    "execution failed; request stays ready"
                );
                self.persist(account)?;
                Err(err.into())
            }
            Ok(()) => {
                let submitter = account
                    .pending
                    .get(&request_id)
                    .map(|r| r.submitter.clone())
                    .ok_or(MultisigError::UnknownRequest(request_id))?;
                if let Err(err) = self.commit_action(account, &submitter, &action) {
                    // A concurrent execution can invalidate the action between
                    // claim and commit. Release the guard so the request stays
                    // Ready and can be retried or cancelled.
                    if let Some(request) = account.pending.get_mut(&request_id) {
                        request.executing = false;
                    }
                    warn!(
                        account = %account_id,
                        request = request_id,
                        error = %err,
                        "commit failed after effect; request stays ready"
                    );
                    self.persist(account)?;
                    return Err(err);
                }
                if let Some(request) = account.pending.get_mut(&request_id) {
                    request.status = RequestStatus::Executed;
                    request.executing = false;
                }
                account.pending.remove(&request_id);
                info!(account = %account_id, request = request_id, "request executed");
                self.persist(account)?;
                Ok(RequestStatus::Executed)
            }
        }
    }

    // --- Internals ---

    fn apply_with_retry(
        &self,
        account_id: &AccountId,
        action: &Action,
    ) -> Result<(), EffectError> {
        let mut attempt = 0u32;
        loop {
            match self.applier.apply_action(account_id, action) {
                Ok(()) => return Ok(()),
                Err(EffectError::Permanent(msg)) => return Err(EffectError::Permanent(msg)),
                Err(EffectError::Transient(msg)) => {
                    if attempt >= self.config.max_effect_retries {
                        return Err(EffectError::Transient(msg));
                    }
                    let backoff = self
                        .config
                        .retry_backoff_ms
                        .saturating_mul(2u64.saturating_pow(attempt));
                    warn!(
                        account = %account_id,
                        attempt,
                        backoff_ms = backoff,
                        "transient effect failure, retrying"
                    );
                    std::thread::sleep(std::time::Duration::from_millis(backoff));
                    attempt += 1;
                }
            }
        }
    }

    /// Check an action can still succeed against the current key set
    fn validate_action(
        &self,
        account: &Account,
        submitter: &PublicKey,
        action: &Action,
    ) -> Result<(), MultisigError> {
        match action {
            Action::AddKey { public_key, .. } => {
                if account.keys.contains_key(public_key) {
                    return Err(MultisigError::DuplicateKey(public_key.clone()));
                }
            }
            Action::DeleteKey { public_key } => {
                let key = account
                    .keys
                    .get(public_key)
                    .ok_or_else(|| MultisigError::KeyNotFound(public_key.clone()))?;
                if key.is_full_access() && account.full_access_count() == 1 {
                    return Err(MultisigError::LastKeyViolation);
                }
            }
            Action::FunctionCall { deposit, .. } => {
                if let Some(KeyScope::FunctionCall {
                    allowance: Some(allowance),
                    ..
                }) = account.keys.get(submitter).map(|k| &k.scope)
                {
                    if deposit > allowance {
                        return Err(MultisigError::UnauthorizedSigner {
                            signer: submitter.clone(),
                            capability: "allowance".into(),
                        });
                    }
                }
            }
            Action::Disable { .. } => {}
        }
        Ok(())
    }

    /// Apply the local registry side of an executed action
    fn commit_action(
        &self,
        account: &mut Account,
        submitter: &PublicKey,
        action: &Action,
    ) -> Result<(), MultisigError> {
        match action {
            Action::AddKey { public_key, scope } => {
                self.registry.authorize(
                    account,
                    AccessKey {
                        public_key: public_key.clone(),
                        scope: scope.clone(),
                        nonce: 0,
                    },
                )?;
            }
            Action::DeleteKey { public_key } => {
                self.registry.revoke(account, public_key)?;
            }
            Action::FunctionCall { deposit, .. } => {
                if let Some(key) = account.keys.get_mut(submitter) {
                    if let KeyScope::FunctionCall {
                        allowance: Some(allowance),
                        ..
                    } = &mut key.scope
                    {
                        *allowance = allowance.saturating_sub(*deposit);
                    }
                }
            }
            Action::Disable { recovery_key } => {
                // Fail closed: only the recovery key survives, and the
                // request queue is cleared wholesale.
                account.keys.clear();
                let key = AccessKey::full_access(recovery_key.clone());
                account.keys.insert(key.public_key.clone(), key);
                account.pending.clear();
                account.threshold = None;
                warn!(account = %account.account_id, "account disabled, recovery key installed");
            }
        }
        Ok(())
    }

    fn verify_capability(
        &self,
        account: &Account,
        proof: &SignerProof,
        capability: Capability,
    ) -> Result<(), MultisigError> {
        if !self
            .registry
            .is_authorized_signer(account, &proof.public_key, capability)
        {
            return Err(MultisigError::UnauthorizedSigner {
                signer: proof.public_key.clone(),
                capability: capability.method_name().into(),
            });
        }
        Ok(())
    }

    fn verify_signature(
        &self,
        _account: &Account,
        proof: &SignerProof,
        payload: &[u8],
    ) -> Result<(), MultisigError> {
        if !self
            .verifier
            .verify_signature(&proof.public_key, payload, &proof.signature)
        {
            return Err(MultisigError::UnauthorizedSigner {
                signer: proof.public_key.clone(),
                capability: "signature".into(),
            });
        }
        Ok(())
    }

    fn verify_owner(
        &self,
        account: &Account,
        proof: &SignerProof,
        payload: &[u8],
    ) -> Result<(), MultisigError> {
        let full_access = account
            .keys
            .get(&proof.public_key)
            .map(|k| k.is_full_access())
            .unwrap_or(false);
        if !full_access {
            return Err(MultisigError::UnauthorizedSigner {
                signer: proof.public_key.clone(),
                capability: "full_access".into(),
            });
        }
        self.verify_signature(account, proof, payload)
    }

    fn with_account<T>(
        &self,
        account_id: &AccountId,
        f: impl FnOnce(&Self, &mut Account) -> Result<T, MultisigError>,
    ) -> Result<T, MultisigError> {
        let mut accounts = self.accounts.lock().expect("account map lock poisoned");
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| MultisigError::UnknownAccount(account_id.clone()))?;
        let out = f(self, account)?;
        self.persist(account)?;
        Ok(out)
    }

    fn persist(&self, account: &Account) -> Result<(), MultisigError> {
        if let Some(storage) = &self.storage {
            storage.save_account(account)?;
        }
        Ok(())
    }
}

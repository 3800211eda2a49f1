//! Request ledger: pending multi-signature requests and their confirmations
//!
//! Expiry is evaluated lazily on every access; there is no background timer.
//! A lapsed request is reported through its status, then purged.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::types::{Action, Request, RequestId, RequestStatus};
use crate::account::types::{Account, PublicKey};
use crate::error::MultisigError;
use crate::policy::ConfirmationPolicy;

pub struct RequestLedger {
    expiry_window: Duration,
}

impl RequestLedger {
    pub fn new(expiry_window: Duration) -> Self {
        Self { expiry_window }
    }

    fn lapsed(&self, request: &Request, now: DateTime<Utc>) -> bool {
        !request.status.is_terminal()
            && !request.executing
            && now - request.created_at > self.expiry_window
    }

    /// Create a new Pending request, or return the id of an identical action
    /// already open on this account (idempotent submission).
    pub fn submit(
        &self,
        account: &mut Account,
        action: Action,
        submitter: &PublicKey,
        now: DateTime<Utc>,
    ) -> RequestId {
        self.purge_expired(account, now);

        if let Some(existing) = account
            .pending
            .values()
            .find(|r| r.action == action && !r.status.is_terminal())
        {
            debug!(
                account = %account.account_id,
                request = existing.request_id,
                "identical action already open, reusing request"
            );
            return existing.request_id;
        }

        let request_id = account.next_request_id;
        account.next_request_id += 1;

        let request = Request::new(request_id, action, submitter.clone(), now);
        account.pending.insert(request_id, request);
        info!(account = %account.account_id, request = request_id, "request submitted");
        request_id
    }

    /// Add a confirming signer and report the status after consulting the
    /// policy. Confirming an already-confirmed request is a no-op; a request
    /// mid-execution keeps its status unchanged.
    pub fn confirm(
        &self,
        account: &mut Account,
        request_id: RequestId,
        signer: &PublicKey,
        now: DateTime<Utc>,
        policy: &dyn ConfirmationPolicy,
    ) -> Result<RequestStatus, MultisigError> {
        self.expire_on_access(account, request_id, now)?;

        {
            let request = account
                .pending
                .get_mut(&request_id)
                .ok_or(MultisigError::UnknownRequest(request_id))?;
            if request.executing {
                // Execution has begun; no further confirmations are accepted.
                return Ok(request.status);
            }
            request.confirmations.insert(signer.clone());
        }

        let ready = {
            let request = &account.pending[&request_id];
            policy.is_ready(request, account)?
        };

        let request = account
            .pending
            .get_mut(&request_id)
            .ok_or(MultisigError::UnknownRequest(request_id))?;
        if ready && request.status == RequestStatus::Pending {
            request.status = RequestStatus::Ready;
            info!(account = %account.account_id, request = request_id, "request ready");
        }
        Ok(request.status)
    }

    /// Snapshot lookup. A lapsed request transitions to Expired and is
    /// reported through its status, not silently dropped; the next mutating
    /// access purges it.
    pub fn get(
        &self,
        account: &mut Account,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<Request, MultisigError> {
        let request = account
            .pending
            .get_mut(&request_id)
            .ok_or(MultisigError::UnknownRequest(request_id))?;
        if self.lapsed(request, now) {
            request.status = RequestStatus::Expired;
            debug!(account = %account.account_id, request = request_id, "request expired");
        }
        Ok(request.clone())
    }

    /// Cancel a request before execution. Terminal and irreversible.
    pub fn cancel(
        &self,
        account: &mut Account,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<RequestStatus, MultisigError> {
        self.expire_on_access(account, request_id, now)?;

        let request = account
            .pending
            .get_mut(&request_id)
            .ok_or(MultisigError::UnknownRequest(request_id))?;
        if request.executing {
            return Err(MultisigError::ExecutionInProgress(request_id));
        }
        request.status = RequestStatus::Cancelled;
        info!(account = %account.account_id, request = request_id, "request cancelled");
        account.pending.remove(&request_id);
        Ok(RequestStatus::Cancelled)
    }

    /// Purge every lapsed request; returns how many were removed.
    pub fn purge_expired(&self, account: &mut Account, now: DateTime<Utc>) -> usize {
        let lapsed: Vec<RequestId> = account
            .pending
            .values()
            .filter(|r| r.status == RequestStatus::Expired || self.lapsed(r, now))
            .map(|r| r.request_id)
            .collect();
        for request_id in &lapsed {
            debug!(account = %account.account_id, request = request_id, "request expired");
            account.pending.remove(request_id);
        }
        lapsed.len()
    }

    /// Lazy expiry check for a single request; purges and reports
    /// `AlreadyExpired` when the window has elapsed.
    fn expire_on_access(
        &self,
        account: &mut Account,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<(), MultisigError> {
        let expired = account
            .pending
            .get(&request_id)
            .map(|r| r.status == RequestStatus::Expired || self.lapsed(r, now))
            .unwrap_or(false);
        if expired {
            account.pending.remove(&request_id);
            return Err(MultisigError::AlreadyExpired(request_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::registry::AccessKeyRegistry;
    use crate::account::types::AccessKey;
    use crate::policy::ThresholdPolicy;

    fn setup() -> (RequestLedger, ThresholdPolicy, Account) {
        let ledger = RequestLedger::new(Duration::minutes(30));
        let policy = ThresholdPolicy::new(2);
        let mut account = Account::new("alice", AccessKey::full_access("owner"), Utc::now());
        let registry = AccessKeyRegistry::new();
        for s in ["s1", "s2", "s3"] {
            registry
                .authorize(&mut account, AccessKey::multisig(s, "alice"))
                .unwrap();
        }
        (ledger, policy, account)
    }

    fn add_key_action() -> Action {
        Action::AddKey {
            public_key: "newkey".into(),
            scope: crate::account::types::KeyScope::FullAccess,
        }
    }

    #[test]
    fn test_submit_is_idempotent() {
        let (ledger, _, mut account) = setup();
        let now = Utc::now();

        let first = ledger.submit(&mut account, add_key_action(), &"s1".into(), now);
        let second = ledger.submit(&mut account, add_key_action(), &"s2".into(), now);
        assert_eq!(first, second);
        assert_eq!(account.pending.len(), 1);
    }

    #[test]
    fn test_distinct_actions_get_distinct_requests() {
        let (ledger, _, mut account) = setup();
        let now = Utc::now();

        let first = ledger.submit(&mut account, add_key_action(), &"s1".into(), now);
        let second = ledger.submit(
            &mut account,
            Action::DeleteKey {
                public_key: "s3".into(),
            },
            &"s1".into(),
            now,
        );
        assert_ne!(first, second);
    }

    #[test]
    fn test_confirm_unknown_request() {
        let (ledger, policy, mut account) = setup();
        let err = ledger
            .confirm(&mut account, 42, &"s1".into(), Utc::now(), &policy)
            .unwrap_err();
        assert!(matches!(err, MultisigError::UnknownRequest(42)));
    }

    #[test]
    fn test_confirmation_order_independence() {
        let (ledger, policy, mut account) = setup();
        let now = Utc::now();

        let id = ledger.submit(&mut account, add_key_action(), &"s1".into(), now);
        ledger
            .confirm(&mut account, id, &"s1".into(), now, &policy)
            .unwrap();
        let ab = ledger
            .confirm(&mut account, id, &"s2".into(), now, &policy)
            .unwrap();

        let mut other = {
            let (_, _, account) = setup();
            account
        };
        let id2 = ledger.submit(&mut other, add_key_action(), &"s2".into(), now);
        ledger
            .confirm(&mut other, id2, &"s2".into(), now, &policy)
            .unwrap();
        let ba = ledger
            .confirm(&mut other, id2, &"s1".into(), now, &policy)
            .unwrap();

        assert_eq!(ab, ba);
        assert_eq!(ab, RequestStatus::Ready);
    }

    #[test]
    fn test_duplicate_confirmation_is_noop() {
        let (ledger, policy, mut account) = setup();
        let now = Utc::now();

        let id = ledger.submit(&mut account, add_key_action(), &"s1".into(), now);
        ledger
            .confirm(&mut account, id, &"s1".into(), now, &policy)
            .unwrap();
        let status = ledger
            .confirm(&mut account, id, &"s1".into(), now, &policy)
            .unwrap();
        assert_eq!(status, RequestStatus::Pending);
        assert_eq!(account.pending[&id].confirmations.len(), 1);
    }

    #[test]
    fn test_expiry_on_access() {
        let (ledger, policy, mut account) = setup();
        let t0 = Utc::now();

        let id = ledger.submit(&mut account, add_key_action(), &"s1".into(), t0);

        // One second past the window
        let late = t0 + Duration::minutes(30) + Duration::seconds(1);
        let err = ledger
            .confirm(&mut account, id, &"s1".into(), late, &policy)
            .unwrap_err();
        assert!(matches!(err, MultisigError::AlreadyExpired(_)));

        // Purged: a later confirm no longer finds it
        let err = ledger
            .confirm(&mut account, id, &"s1".into(), late, &policy)
            .unwrap_err();
        assert!(matches!(err, MultisigError::UnknownRequest(_)));
    }

    #[test]
    fn test_get_reports_expired_status_before_purge() {
        let (ledger, policy, mut account) = setup();
        let t0 = Utc::now();

        let id = ledger.submit(&mut account, add_key_action(), &"s1".into(), t0);
        let late = t0 + Duration::hours(1);

        // Query reports the transition instead of dropping the request
        let snapshot = ledger.get(&mut account, id, late).unwrap();
        assert_eq!(snapshot.status, RequestStatus::Expired);
        assert!(account.pending.contains_key(&id));

        // The next mutating access purges it
        let err = ledger
            .confirm(&mut account, id, &"s1".into(), late, &policy)
            .unwrap_err();
        assert!(matches!(err, MultisigError::AlreadyExpired(_)));
        assert!(!account.pending.contains_key(&id));
    }

    #[test]
    fn test_expired_request_can_be_resubmitted() {
        let (ledger, _, mut account) = setup();
        let t0 = Utc::now();

        let first = ledger.submit(&mut account, add_key_action(), &"s1".into(), t0);
        let late = t0 + Duration::hours(1);
        let second = ledger.submit(&mut account, add_key_action(), &"s1".into(), late);
        assert_ne!(first, second);
    }

    #[test]
    fn test_cancel_pre_execution() {
        let (ledger, policy, mut account) = setup();
        let now = Utc::now();

        let id = ledger.submit(&mut account, add_key_action(), &"s1".into(), now);
        let status = ledger.cancel(&mut account, id, now).unwrap();
        assert_eq!(status, RequestStatus::Cancelled);

        let err = ledger
            .confirm(&mut account, id, &"s1".into(), now, &policy)
            .unwrap_err();
        assert!(matches!(err, MultisigError::UnknownRequest(_)));
    }

    #[test]
    fn test_cancel_rejected_mid_execution() {
        let (ledger, _, mut account) = setup();
        let now = Utc::now();

        let id = ledger.submit(&mut account, add_key_action(), &"s1".into(), now);
        account.pending.get_mut(&id).unwrap().executing = true;

        let err = ledger.cancel(&mut account, id, now).unwrap_err();
        assert!(matches!(err, MultisigError::ExecutionInProgress(_)));
    }

    #[test]
    fn test_purge_expired_sweep() {
        let (ledger, _, mut account) = setup();
        let t0 = Utc::now();

        ledger.submit(&mut account, add_key_action(), &"s1".into(), t0);
        ledger.submit(
            &mut account,
            Action::DeleteKey {
                public_key: "s3".into(),
            },
            &"s1".into(),
            t0,
        );

        let late = t0 + Duration::hours(1);
        assert_eq!(ledger.purge_expired(&mut account, late), 2);
        assert!(account.pending.is_empty());
        assert_eq!(ledger.purge_expired(&mut account, late), 0);
    }
}

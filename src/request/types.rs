//! Request type definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::account::types::{AccountId, KeyScope, PublicKey};

/// Request identifier - incrementing counter scoped to the owning account
pub type RequestId = u64;

/// Action proposed for multi-signature approval
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    AddKey {
        public_key: PublicKey,
        scope: KeyScope,
    },
    DeleteKey {
        public_key: PublicKey,
    },
    FunctionCall {
        receiver_id: AccountId,
        method_name: String,
        args: Vec<u8>,
        deposit: u128,
    },
    /// Fail-closed shutdown: replaces all authorized keys with the single
    /// recovery key and clears the request queue
    Disable {
        recovery_key: PublicKey,
    },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Accepting confirmations
    Pending,
    /// Threshold met; awaiting execution
    Ready,
    /// Side effects applied exactly once (terminal)
    Executed,
    /// Expiry window elapsed unexecuted (terminal)
    Expired,
    /// Explicitly cancelled before execution (terminal)
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Executed | RequestStatus::Expired | RequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Ready => "ready",
            RequestStatus::Executed => "executed",
            RequestStatus::Expired => "expired",
            RequestStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A pending multi-signature request
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Request {
    pub request_id: RequestId,
    pub action: Action,
    pub submitter: PublicKey,

    /// Distinct confirming signers; insertion order is irrelevant
    pub confirmations: BTreeSet<PublicKey>,

    pub status: RequestStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Execution guard: set while the effect applier runs so no further
    /// confirmations are accepted and execution happens at most once.
    /// Deliberately not persisted - an interrupted execution is not in
    /// flight after restart.
    #[serde(skip)]
    pub executing: bool,
}

impl Request {
    pub fn new(
        request_id: RequestId,
        action: Action,
        submitter: PublicKey,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            request_id,
            action,
            submitter,
            confirmations: BTreeSet::new(),
            status: RequestStatus::Pending,
            created_at,
            executing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Ready.is_terminal());
        assert!(RequestStatus::Executed.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }
}

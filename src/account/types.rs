//! Account and access-key type definitions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::request::types::{Request, RequestId};

/// Account identifier - human-readable name, globally unique per network
pub type AccountId = String;

/// Hex-encoded public key identifying a signer
pub type PublicKey = String;

/// Closed capability set gating multisig operations.
///
/// The on-ledger representation stores these as method names on a
/// function-call key; here they are an enum so checks stay exhaustive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    AddRequest,
    AddRequestAndConfirm,
    DeleteRequest,
    Confirm,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::AddRequest,
        Capability::AddRequestAndConfirm,
        Capability::DeleteRequest,
        Capability::Confirm,
    ];

    /// Method name used on the wire and in allowed-method sets
    pub fn method_name(&self) -> &'static str {
        match self {
            Capability::AddRequest => "add_request",
            Capability::AddRequestAndConfirm => "add_request_and_confirm",
            Capability::DeleteRequest => "delete_request",
            Capability::Confirm => "confirm",
        }
    }
}

/// Permission scope of an access key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum KeyScope {
    /// Unrestricted authority over the account
    FullAccess,

    /// Restricted to specific contract methods, with an optional spending budget
    FunctionCall {
        contract_id: AccountId,
        allowed_methods: BTreeSet<String>,
        allowance: Option<u128>,
    },
}

/// An authorized key on an account
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccessKey {
    pub public_key: PublicKey,
    pub scope: KeyScope,

    /// Incremented on each use; prevents replay
    pub nonce: u64,
}

impl AccessKey {
    pub fn full_access(public_key: impl Into<PublicKey>) -> Self {
        Self {
            public_key: public_key.into(),
            scope: KeyScope::FullAccess,
            nonce: 0,
        }
    }

    /// Function-call key carrying the four multisig capabilities, scoped to
    /// the account's own multisig contract
    pub fn multisig(public_key: impl Into<PublicKey>, contract_id: impl Into<AccountId>) -> Self {
        let allowed_methods = Capability::ALL
            .iter()
            .map(|c| c.method_name().to_string())
            .collect();
        Self {
            public_key: public_key.into(),
            scope: KeyScope::FunctionCall {
                contract_id: contract_id.into(),
                allowed_methods,
                allowance: None,
            },
            nonce: 0,
        }
    }

    pub fn is_full_access(&self) -> bool {
        matches!(self.scope, KeyScope::FullAccess)
    }

    /// Whether this key holds the given capability. Full-access keys hold
    /// everything; function-call keys only what their method set names.
    pub fn has_capability(&self, capability: Capability) -> bool {
        match &self.scope {
            KeyScope::FullAccess => true,
            KeyScope::FunctionCall {
                allowed_methods, ..
            } => allowed_methods.contains(capability.method_name()),
        }
    }

    /// Whether confirmations from this key count toward the threshold.
    /// `add_request_and_confirm` implies confirming at submission, so it
    /// counts even without the plain `confirm` capability.
    pub fn can_confirm(&self) -> bool {
        self.has_capability(Capability::Confirm)
            || self.has_capability(Capability::AddRequestAndConfirm)
    }
}

/// Main account structure: authorized keys plus the pending request queue
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    pub account_id: AccountId,

    /// Unique by public key; at least one full-access key must remain
    pub keys: BTreeMap<PublicKey, AccessKey>,

    /// Request ids increment, so map order equals submission order
    pub pending: BTreeMap<RequestId, Request>,
    pub next_request_id: RequestId,

    /// Per-account confirmation threshold; falls back to the configured default
    pub threshold: Option<u32>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Account {
    pub fn new(
        account_id: impl Into<AccountId>,
        initial_key: AccessKey,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(initial_key.public_key.clone(), initial_key);
        Self {
            account_id: account_id.into(),
            keys,
            pending: BTreeMap::new(),
            next_request_id: 0,
            threshold: None,
            created_at,
        }
    }

    pub fn full_access_count(&self) -> usize {
        self.keys.values().filter(|k| k.is_full_access()).count()
    }

    /// Number of keys whose confirmations count toward the threshold
    pub fn confirmer_count(&self) -> usize {
        self.keys.values().filter(|k| k.can_confirm()).count()
    }
}

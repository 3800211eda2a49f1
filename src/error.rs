use thiserror::Error;

use crate::account::types::{AccountId, PublicKey};
use crate::request::types::RequestId;

/// Failure of the external effect applier. Transient failures are retried
/// by the engine with bounded backoff; permanent ones surface immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("Transient effect failure: {0}")]
    Transient(String),
    #[error("Permanent effect failure: {0}")]
    Permanent(String),
}

#[derive(Error, Debug)]
pub enum MultisigError {
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("Account already exists: {0}")]
    AccountExists(AccountId),
    #[error("Unknown request: {0}")]
    UnknownRequest(RequestId),
    #[error("Request {0} already expired")]
    AlreadyExpired(RequestId),
    #[error("Duplicate key: {0}")]
    DuplicateKey(PublicKey),
    #[error("Key not found: {0}")]
    KeyNotFound(PublicKey),
    #[error("Cannot remove the last full-access key")]
    LastKeyViolation,
    #[error("Signer {signer} not authorized for {capability}")]
    UnauthorizedSigner { signer: PublicKey, capability: String },
    #[error("Confirmation threshold not satisfiable: {0}")]
    ThresholdNotConfigured(String),
    #[error("Request {0} is already being executed")]
    ExecutionInProgress(RequestId),
    #[error("Effect applier failed: {0}")]
    Effect(#[from] EffectError),
    #[error("Storage error: {0}")]
    Storage(String),
}

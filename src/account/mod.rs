//! Account system module
//!
//! This module implements the account-side state:
//! - Authorized access keys and their permission scope
//! - The closed capability set gating multisig operations
//! - Key authorization, revocation, and batch maintenance

pub mod registry;
pub mod types;

pub use registry::{AccessKeyRegistry, BatchOutcome};
pub use types::{AccessKey, Account, AccountId, Capability, KeyScope, PublicKey};

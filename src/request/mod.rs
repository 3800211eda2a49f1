//! Multi-signature request tracking

pub mod ledger;
pub mod types;

pub use ledger::RequestLedger;
pub use types::{Action, Request, RequestId, RequestStatus};

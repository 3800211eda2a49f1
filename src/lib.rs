pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod policy;
pub mod request;
pub mod storage;

pub use account::{AccessKey, Account, AccountId, Capability, KeyScope, PublicKey};
pub use config::EngineConfig;
pub use engine::{MultisigEngine, SignerProof};
pub use error::{EffectError, MultisigError};
pub use external::{Clock, Ed25519Verifier, EffectApplier, LocalApplier, SignatureVerifier, SystemClock};
pub use policy::{ConfirmationPolicy, ThresholdPolicy};
pub use request::{Action, Request, RequestId, RequestStatus};
pub use storage::{Persistence, SledStore};

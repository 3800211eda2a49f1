//! Durable account snapshots, keyed by account id
//!
//! The engine writes a snapshot after every mutation and reloads at
//! construction, so Pending/Ready requests survive a process restart.

use sled::Db;
use std::path::Path;

use crate::account::types::{Account, AccountId};
use crate::error::MultisigError;

pub trait Persistence: Send + Sync {
    fn save_account(&self, account: &Account) -> Result<(), MultisigError>;
    fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>, MultisigError>;
    fn load_all(&self) -> Result<Vec<Account>, MultisigError>;
}

pub struct SledStore {
    db: Db,
}

const ACCOUNT_PREFIX: &str = "account:";

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MultisigError> {
        let db = sled::open(path).map_err(|e| MultisigError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    fn key(account_id: &AccountId) -> String {
        format!("{}{}", ACCOUNT_PREFIX, account_id)
    }
}

impl Persistence for SledStore {
    fn save_account(&self, account: &Account) -> Result<(), MultisigError> {
        let bytes =
            bincode::serialize(account).map_err(|e| MultisigError::Storage(e.to_string()))?;
        self.db
            .insert(Self::key(&account.account_id).as_bytes(), bytes)
            .map_err(|e| MultisigError::Storage(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| MultisigError::Storage(e.to_string()))?;
        Ok(())
    }

    fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>, MultisigError> {
        match self.db.get(Self::key(account_id).as_bytes()) {
            Ok(Some(bytes)) => {
                let account = bincode::deserialize(&bytes)
                    .map_err(|e| MultisigError::Storage(e.to_string()))?;
                Ok(Some(account))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(MultisigError::Storage(e.to_string())),
        }
    }

    fn load_all(&self) -> Result<Vec<Account>, MultisigError> {
        let mut accounts = Vec::new();
        for entry in self.db.scan_prefix(ACCOUNT_PREFIX.as_bytes()) {
            let (_, bytes) = entry.map_err(|e| MultisigError::Storage(e.to_string()))?;
            let account =
                bincode::deserialize(&bytes).map_err(|e| MultisigError::Storage(e.to_string()))?;
            accounts.push(account);
        }
        Ok(accounts)
    }
}

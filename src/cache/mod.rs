//! Identity provider token cache.
//!
//! Holds the signed-in accounts and their refresh tokens. Access tokens are
//! never written here; they live only in the session manager's memory.

pub mod file;
pub mod secure;

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::auth::identity::Identity;
use crate::error::CacheError;
pub use file::FileTokenCache;
pub use secure::SecureString;

/// One cached account entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAccount {
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SecureString>,
}

impl CachedAccount {
    pub fn new(identity: Identity, refresh_token: Option<SecureString>) -> Self {
        Self {
            identity,
            refresh_token,
        }
    }
}

/// Storage for cached accounts.
///
/// Implementations keep at most one entry per `home_account_id` and return
/// entries in the order they were first stored.
pub trait TokenCache: Send + Sync {
    /// All cached accounts.
    fn accounts(&self) -> Result<Vec<CachedAccount>, CacheError>;

    /// Insert or replace the entry for the account's `home_account_id`.
    fn store(&self, account: CachedAccount) -> Result<(), CacheError>;

    /// Remove every cached account.
    fn clear(&self) -> Result<(), CacheError>;

    /// Look up a single account.
    fn account(&self, home_account_id: &str) -> Result<Option<CachedAccount>, CacheError> {
        Ok(self
            .accounts()?
            .into_iter()
            .find(|a| a.identity.home_account_id == home_account_id))
    }
}

/// Insert or replace by `home_account_id`, keeping first-stored order.
pub(crate) fn upsert(accounts: &mut Vec<CachedAccount>, account: CachedAccount) {
    match accounts
        .iter_mut()
        .find(|a| a.identity.home_account_id == account.identity.home_account_id)
    {
        Some(existing) => *existing = account,
        None => accounts.push(account),
    }
}

/// Process-local token cache.
#[derive(Debug, Default)]
pub struct MemoryTokenCache {
    accounts: Mutex<Vec<CachedAccount>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-populated with accounts.
    pub fn with_accounts(accounts: Vec<CachedAccount>) -> Self {
        let cache = Self::new();
        for account in accounts {
            upsert(&mut cache.lock(), account);
        }
        cache
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CachedAccount>> {
        // A poisoned lock still holds a consistent Vec
        self.accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenCache for MemoryTokenCache {
    fn accounts(&self) -> Result<Vec<CachedAccount>, CacheError> {
        Ok(self.lock().clone())
    }

    fn store(&self, account: CachedAccount) -> Result<(), CacheError> {
        upsert(&mut self.lock(), account);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock().clear();
        Ok(())
    }
}

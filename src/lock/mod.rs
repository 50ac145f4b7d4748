//! Per-profile mutual exclusion
//!
//! A [`ProfileLock`] is taken before a check touches a profile. Acquisition
//! never waits: if another holder has the profile, the caller gets
//! [`LockError::Busy`] and skips the check. Every record carries a TTL so a
//! holder that dies without releasing cannot wedge the profile.

pub mod janitor;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::model::ProfileKey;

pub use janitor::LockJanitor;
pub use memory::MemoryLockStore;

/// Atomic conditional-set-with-expiry primitive
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `holder` if it is absent or expired. Returns whether the
    /// caller now holds the key.
    async fn acquire_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Remove `key` only if `holder` still owns it
    async fn release_if_holder(&self, key: &str, holder: &str) -> Result<bool, LockError>;

    /// Drop expired records, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, LockError>;
}

/// Proof of lock ownership
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-blocking lock keyed by profile
#[derive(Clone)]
pub struct ProfileLock {
    store: Arc<dyn LockStore>,
}

impl ProfileLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    pub async fn try_acquire(&self, profile: &ProfileKey, ttl: Duration) -> Result<LockToken, LockError> {
        let token = LockToken::generate();
        if self
            .store
            .acquire_if_absent(&lock_key(profile), token.as_str(), ttl)
            .await?
        {
            Ok(token)
        } else {
            Err(LockError::Busy(profile.to_string()))
        }
    }

    /// Release a held lock. Returns false if the lock had already expired or
    /// been taken over.
    pub async fn release(&self, profile: &ProfileKey, token: &LockToken) -> Result<bool, LockError> {
        let released = self
            .store
            .release_if_holder(&lock_key(profile), token.as_str())
            .await?;
        if !released {
            tracing::warn!(profile = %profile, "Profile lock was no longer held at release");
        }
        Ok(released)
    }
}

fn lock_key(profile: &ProfileKey) -> String {
    format!("monitor:profile:{}", profile)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LockError {
    #[error("Profile {0} is locked by another check")]
    Busy(String),

    #[error("Lock store error: {0}")]
    Store(String),
}

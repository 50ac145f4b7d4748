use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{LockError, LockStore};

#[derive(Debug, Clone)]
struct LockRecord {
    holder: String,
    expires_at: Instant,
}

/// Process-local lock store.
///
/// Each key is updated under its DashMap shard lock, so acquisition and
/// release are linearizable within the process. Expired records are
/// replaced on the next acquisition or removed by `purge_expired`.
#[derive(Default)]
pub struct MemoryLockStore {
    records: DashMap<String, LockRecord>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored, expired or not
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keys currently held and not expired
    pub fn held(&self) -> usize {
        let now = Instant::now();
        self.records.iter().filter(|r| r.expires_at > now).count()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| LockError::Store(format!("ttl {:?} out of range", ttl)))?;
        let record = LockRecord {
            holder: holder.to_string(),
            expires_at,
        };

        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().expires_at > now {
                    return Ok(false);
                }
                tracing::warn!(key = %key, "Taking over expired lock");
                existing.insert(record);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn release_if_holder(&self, key: &str, holder: &str) -> Result<bool, LockError> {
        Ok(self
            .records
            .remove_if(key, |_, record| record.holder == holder)
            .is_some())
    }

    async fn purge_expired(&self) -> Result<usize, LockError> {
        let now = Instant::now();
        let mut purged = 0;
        self.records.retain(|_, record| {
            let live = record.expires_at > now;
            if !live {
                purged += 1;
            }
            live
        });
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryLockStore::new();
        store
            .acquire_if_absent("a", "h1", Duration::from_millis(1))
            .await
            .unwrap();
        store
            .acquire_if_absent("b", "h2", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.held(), 1);
    }

    #[tokio::test]
    async fn test_release_wrong_holder_keeps_record() {
        let store = MemoryLockStore::new();
        assert!(store
            .acquire_if_absent("a", "h1", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store.release_if_holder("a", "h2").await.unwrap());
        assert!(!store
            .acquire_if_absent("a", "h2", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(store.release_if_holder("a", "h1").await.unwrap());
    }
}

//! Owner and channel lookups
//!
//! Users and their delivery channels are managed outside the pipeline; the
//! pipeline only needs to ask who owns a profile and where that user wants
//! notifications. Lookups are cached with moka since they are repeated on
//! every fired alert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::sync::Cache;

use crate::alerts::UserChannel;
use crate::model::{ProfileKey, UserId};

#[async_trait]
pub trait Directory: Send + Sync {
    async fn owner_of(&self, profile: &ProfileKey) -> Result<Option<UserId>, DirectoryError>;
    async fn channel_for(&self, user: UserId) -> Result<Option<UserChannel>, DirectoryError>;

    /// Share of lookups answered from a cache, if this directory has one
    fn cache_hit_rate(&self) -> Option<f64> {
        None
    }
}

/// In-process directory
#[derive(Default)]
pub struct MemoryDirectory {
    owners: DashMap<ProfileKey, UserId>,
    channels: DashMap<UserId, UserChannel>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(&self, profile: ProfileKey, user: UserId) {
        self.owners.insert(profile, user);
    }

    pub fn set_channel(&self, user: UserId, channel: UserChannel) {
        self.channels.insert(user, channel);
    }

    pub fn remove_channel(&self, user: UserId) -> Option<UserChannel> {
        self.channels.remove(&user).map(|(_, c)| c)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn owner_of(&self, profile: &ProfileKey) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.owners.get(profile).map(|u| *u))
    }

    async fn channel_for(&self, user: UserId) -> Result<Option<UserChannel>, DirectoryError> {
        Ok(self.channels.get(&user).map(|c| c.clone()))
    }
}

/// TTL cache in front of another directory. Only found entries are cached.
pub struct CachedDirectory {
    inner: Arc<dyn Directory>,
    owners: Cache<ProfileKey, UserId>,
    channels: Cache<UserId, UserChannel>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn Directory>, ttl: Duration) -> Self {
        Self {
            inner,
            owners: Cache::builder().max_capacity(10_000).time_to_live(ttl).build(),
            channels: Cache::builder().max_capacity(10_000).time_to_live(ttl).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Forget a user's cached channel
    pub fn invalidate_user(&self, user: UserId) {
        self.channels.invalidate(&user);
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Directory for CachedDirectory {
    async fn owner_of(&self, profile: &ProfileKey) -> Result<Option<UserId>, DirectoryError> {
        if let Some(user) = self.owners.get(profile) {
            self.hit();
            return Ok(Some(user));
        }
        self.miss();

        let user = self.inner.owner_of(profile).await?;
        if let Some(user) = user {
            self.owners.insert(profile.clone(), user);
        }
        Ok(user)
    }

    async fn channel_for(&self, user: UserId) -> Result<Option<UserChannel>, DirectoryError> {
        if let Some(channel) = self.channels.get(&user) {
            self.hit();
            return Ok(Some(channel));
        }
        self.miss();

        let channel = self.inner.channel_for(user).await?;
        if let Some(channel) = &channel {
            self.channels.insert(user, channel.clone());
        }
        Ok(channel)
    }

    fn cache_hit_rate(&self) -> Option<f64> {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            Some(0.0)
        } else {
            Some(hits as f64 / total as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_directory() {
        let directory = MemoryDirectory::new();
        let key = ProfileKey::parse("someone").unwrap();

        assert_eq!(directory.owner_of(&key).await.unwrap(), None);
        directory.set_owner(key.clone(), UserId(9));
        directory.set_channel(UserId(9), UserChannel::Log);

        assert_eq!(directory.owner_of(&key).await.unwrap(), Some(UserId(9)));
        assert_eq!(directory.channel_for(UserId(9)).await.unwrap(), Some(UserChannel::Log));
        assert_eq!(directory.cache_hit_rate(), None);
    }

    #[tokio::test]
    async fn test_cached_directory_serves_from_cache() {
        let inner = Arc::new(MemoryDirectory::new());
        inner.set_channel(
            UserId(1),
            UserChannel::Telegram {
                chat_id: "100".into(),
            },
        );
        let cached = CachedDirectory::new(inner.clone(), Duration::from_secs(60));

        assert!(cached.channel_for(UserId(1)).await.unwrap().is_some());

        // Served from cache even after the backing entry is gone
        inner.remove_channel(UserId(1));
        assert!(cached.channel_for(UserId(1)).await.unwrap().is_some());
        assert_eq!(cached.cache_hit_rate(), Some(0.5));

        cached.invalidate_user(UserId(1));
        assert!(cached.channel_for(UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_directory_does_not_cache_misses() {
        let inner = Arc::new(MemoryDirectory::new());
        let cached = CachedDirectory::new(inner.clone(), Duration::from_secs(60));
        let key = ProfileKey::parse("late").unwrap();

        assert_eq!(cached.owner_of(&key).await.unwrap(), None);
        inner.set_owner(key.clone(), UserId(4));
        assert_eq!(cached.owner_of(&key).await.unwrap(), Some(UserId(4)));
    }
}

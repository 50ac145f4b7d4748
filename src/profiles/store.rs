use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{MonitoredProfile, ProfileKey};

/// Registered profiles, sharded by key
#[derive(Default)]
pub struct ProfileStore {
    profiles: DashMap<ProfileKey, MonitoredProfile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a profile, or re-enable an existing one keeping its state
    pub fn register(&self, profile: MonitoredProfile) -> MonitoredProfile {
        let mut entry = self
            .profiles
            .entry(profile.key.clone())
            .or_insert_with(|| profile.clone());

        if !entry.enabled {
            entry.enabled = true;
            entry.consecutive_failures = 0;
            entry.last_error = None;
        }
        if profile.display_name.is_some() {
            entry.display_name = profile.display_name;
        }
        entry.clone()
    }

    pub fn get(&self, key: &ProfileKey) -> Option<MonitoredProfile> {
        self.profiles.get(key).map(|p| p.clone())
    }

    /// All profiles ordered by key
    pub fn list(&self) -> Vec<MonitoredProfile> {
        let mut profiles: Vec<MonitoredProfile> = self.profiles.iter().map(|p| p.clone()).collect();
        profiles.sort_by(|a, b| a.key.cmp(&b.key));
        profiles
    }

    /// Enabled profiles owed a check at `now`
    pub fn due(&self, now: DateTime<Utc>, interval: Duration) -> Vec<ProfileKey> {
        let mut keys: Vec<ProfileKey> = self
            .profiles
            .iter()
            .filter(|p| p.is_due(now, interval))
            .map(|p| p.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn is_enabled(&self, key: &ProfileKey) -> bool {
        self.profiles.get(key).map(|p| p.enabled).unwrap_or(false)
    }

    /// Advance the profile after a successful check
    pub fn record_success(&self, key: &ProfileKey, value: u64, at: DateTime<Utc>) -> bool {
        match self.profiles.get_mut(key) {
            Some(mut profile) => {
                profile.last_checked = Some(at);
                profile.last_known_value = Some(value);
                profile.last_error = None;
                profile.consecutive_failures = 0;
                true
            }
            None => false,
        }
    }

    /// Note a failed check; `last_checked` is left alone
    pub fn record_failure(&self, key: &ProfileKey, error: impl Into<String>) -> u32 {
        match self.profiles.get_mut(key) {
            Some(mut profile) => {
                profile.last_error = Some(error.into());
                profile.consecutive_failures += 1;
                profile.consecutive_failures
            }
            None => 0,
        }
    }

    /// Soft-disable monitoring
    pub fn disable(&self, key: &ProfileKey, reason: Option<String>) -> bool {
        match self.profiles.get_mut(key) {
            Some(mut profile) => {
                profile.enabled = false;
                if reason.is_some() {
                    profile.last_error = reason;
                }
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.profiles.iter().filter(|p| p.enabled).count()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

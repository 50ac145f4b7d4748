use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::config::{Alert, AlertId};
use crate::model::ProfileKey;

/// Alerts grouped per profile.
///
/// State changes for one profile happen under that profile's map entry, so
/// a PENDING to TRIGGERED transition is a compare-and-set.
pub struct AlertStore {
    by_profile: DashMap<ProfileKey, Vec<Alert>>,
    index: DashMap<AlertId, ProfileKey>,
    next_id: AtomicU64,
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            by_profile: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store a new alert and assign its id
    pub fn create(&self, mut alert: Alert) -> Result<Alert, AlertStoreError> {
        if alert.threshold == 0 {
            return Err(AlertStoreError::InvalidThreshold);
        }

        let mut alerts = self.by_profile.entry(alert.profile.clone()).or_default();
        if alerts
            .iter()
            .any(|a| a.user == alert.user && a.threshold == alert.threshold)
        {
            return Err(AlertStoreError::Duplicate {
                profile: alert.profile.to_string(),
                threshold: alert.threshold,
            });
        }

        alert.id = AlertId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.index.insert(alert.id, alert.profile.clone());
        alerts.push(alert.clone());
        alerts.sort_by_key(|a| (a.threshold, a.id));

        Ok(alert)
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        let profile = self.index.get(&id)?.clone();
        let alerts = self.by_profile.get(&profile)?;
        alerts.iter().find(|a| a.id == id).cloned()
    }

    /// All alerts of a profile ordered by threshold
    pub fn for_profile(&self, profile: &ProfileKey) -> Vec<Alert> {
        self.by_profile
            .get(profile)
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    /// Enabled alerts still waiting to fire
    pub fn pending_for(&self, profile: &ProfileKey) -> Vec<Alert> {
        self.by_profile
            .get(profile)
            .map(|alerts| {
                alerts
                    .iter()
                    .filter(|a| a.enabled && a.is_pending())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Trigger every enabled pending alert of `profile` matching `predicate`.
    ///
    /// Returns the alerts that moved to TRIGGERED by this call, in threshold order.
    pub fn trigger_where<F>(&self, profile: &ProfileKey, at: DateTime<Utc>, predicate: F) -> Vec<Alert>
    where
        F: Fn(&Alert) -> bool,
    {
        let Some(mut alerts) = self.by_profile.get_mut(profile) else {
            return Vec::new();
        };

        alerts
            .iter_mut()
            .filter(|a| a.enabled && a.is_pending() && predicate(a))
            .filter_map(|a| a.trigger(at).then(|| a.clone()))
            .collect()
    }

    /// Enable/disable an alert
    pub fn set_enabled(&self, id: AlertId, enabled: bool) -> bool {
        let Some(profile) = self.index.get(&id).map(|p| p.clone()) else {
            return false;
        };
        let Some(mut alerts) = self.by_profile.get_mut(&profile) else {
            return false;
        };
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Number of alerts across all profiles
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlertStoreError {
    #[error("Alert threshold must be greater than zero")]
    InvalidThreshold,

    #[error("Alert for {profile} at {threshold} already exists")]
    Duplicate { profile: String, threshold: u64 },
}

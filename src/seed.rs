//! Startup seed file
//!
//! Loads users, their notification channels, monitored profiles and alerts
//! from a JSON document:
//!
//! ```json
//! {
//!   "users": [{ "id": 1, "channel": { "type": "telegram", "chat_id": "42" } }],
//!   "profiles": [{ "username": "natgeo", "owner": 1, "alerts": [{ "threshold": 1000000 }] }]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::alerts::UserChannel;
use crate::model::{ProfileKey, UserId};
use crate::profiles::MemoryDirectory;
use crate::service::{MonitorService, ServiceError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub profiles: Vec<SeedProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub id: i64,
    pub channel: Option<UserChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedProfile {
    pub username: String,
    pub owner: i64,
    pub display_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub alerts: Vec<SeedAlert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedAlert {
    pub threshold: u64,
    pub template: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// What applying a seed produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub profiles: usize,
    pub alerts: usize,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, SeedError> {
        let seed: Seed = serde_json::from_str(contents)?;
        seed.check()?;
        Ok(seed)
    }

    fn check(&self) -> Result<(), SeedError> {
        for profile in &self.profiles {
            ProfileKey::parse(&profile.username)
                .map_err(|e| SeedError::Invalid(e.to_string()))?;
            if !self.users.iter().any(|u| u.id == profile.owner) {
                return Err(SeedError::Invalid(format!(
                    "profile {} references unknown user {}",
                    profile.username, profile.owner
                )));
            }
        }
        Ok(())
    }

    /// Record owners and channels; run before the service is built
    pub fn populate(&self, directory: &MemoryDirectory) {
        for user in &self.users {
            if let Some(channel) = &user.channel {
                directory.set_channel(UserId(user.id), channel.clone());
            }
        }
        for profile in &self.profiles {
            if let Ok(key) = ProfileKey::parse(&profile.username) {
                directory.set_owner(key, UserId(profile.owner));
            }
        }
    }

    /// Register profiles and alerts with a running service.
    ///
    /// Alerts that already exist are left alone, so the same seed can be
    /// applied twice.
    pub async fn apply(&self, service: &MonitorService) -> Result<SeedReport, ServiceError> {
        let mut report = SeedReport::default();

        for entry in &self.profiles {
            let profile = service
                .register_profile(&entry.username, entry.display_name.clone())
                .await?;
            report.profiles += 1;

            for alert in &entry.alerts {
                match service.add_alert(profile.key.as_str(), alert.threshold, alert.template.clone()) {
                    Ok(created) => {
                        if !alert.enabled {
                            service.set_alert_enabled(created.id, false)?;
                        }
                        report.alerts += 1;
                    }
                    Err(ServiceError::Alert(crate::alerts::AlertStoreError::Duplicate { .. })) => {}
                    Err(e) => return Err(e),
                }
            }

            if !entry.enabled {
                service.unregister_profile(profile.key.as_str())?;
            }
        }

        tracing::info!(profiles = report.profiles, alerts = report.alerts, "Seed applied");
        Ok(report)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid seed: {0}")]
    Invalid(String),
}

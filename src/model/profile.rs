use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest username the metric source accepts
const MAX_KEY_LEN: usize = 30;

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9._]+$").expect("profile key pattern is valid"))
}

/// External identity of a monitored profile (the username on the source).
///
/// Keys are case-insensitive and stored lower-cased; a leading `@` is
/// accepted and stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileKey(String);

impl ProfileKey {
    pub fn parse(raw: &str) -> Result<Self, InvalidProfileKey> {
        let normalized = raw.trim().trim_start_matches('@').to_ascii_lowercase();

        if normalized.is_empty() || normalized.len() > MAX_KEY_LEN {
            return Err(InvalidProfileKey(raw.to_string()));
        }
        if !key_pattern().is_match(&normalized) {
            return Err(InvalidProfileKey(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProfileKey {
    type Error = InvalidProfileKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProfileKey> for String {
    fn from(key: ProfileKey) -> Self {
        key.0
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("invalid profile key '{0}': expected 1-30 characters of letters, digits, '.' or '_'")]
pub struct InvalidProfileKey(pub String);

/// Identifier of the user owning profiles and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A profile registered for periodic checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredProfile {
    pub key: ProfileKey,
    pub owner: UserId,
    pub display_name: Option<String>,
    /// Soft-disable flag; history is kept when monitoring is off
    pub enabled: bool,
    /// Last successful check
    pub last_checked: Option<DateTime<Utc>>,
    pub last_known_value: Option<u64>,
    /// Most recent recorded failure, cleared on success
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
}

impl MonitoredProfile {
    pub fn new(key: ProfileKey, owner: UserId) -> Self {
        Self {
            key,
            owner,
            display_name: None,
            enabled: true,
            last_checked: None,
            last_known_value: None,
            last_error: None,
            consecutive_failures: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Whether a check is owed at `now` for the given polling interval.
    ///
    /// A last-checked timestamp in the future (clock skew) is treated as not due.
    pub fn is_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= interval)
                .unwrap_or(false),
        }
    }
}

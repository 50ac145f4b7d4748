use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::ProfileKey;

/// How a snapshot's value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Exact count reported by the source
    Success,
    /// Derived from an abbreviated figure such as "12.5K"
    Estimated,
}

/// One timestamped observation of a profile's follower count. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub profile: ProfileKey,
    pub value: u64,
    pub captured_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl MetricSnapshot {
    pub fn new(
        profile: ProfileKey,
        value: u64,
        captured_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self {
            profile,
            value,
            captured_at,
            provenance,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::AlertId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// A single attempt failed; more may follow
    Failed,
    /// Final record once the retry budget is spent or the channel rejected the message
    Exhausted,
}

/// Audit record of one notification delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub alert: AlertId,
    /// 1-based attempt number
    pub attempt: u32,
    pub outcome: DeliveryOutcome,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

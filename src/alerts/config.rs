//! Alert definitions and delivery channels

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::template::DEFAULT_TEMPLATE;
use crate::model::{ProfileKey, UserId};

/// Alert identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a milestone alert. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Pending,
    Triggered,
}

/// Milestone alert on a profile's follower count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub profile: ProfileKey,
    /// User to notify
    pub user: UserId,
    /// Fires when the count rises to or past this value
    pub threshold: u64,
    pub message_template: String,
    /// Disabled alerts are never evaluated
    pub enabled: bool,
    #[serde(default)]
    pub state: AlertState,
    /// Set exactly when the alert triggers
    pub fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Create a pending alert; the id is assigned by the store
    pub fn new(profile: ProfileKey, user: UserId, threshold: u64) -> Self {
        Self {
            id: AlertId(0),
            profile,
            user,
            threshold,
            message_template: DEFAULT_TEMPLATE.to_string(),
            enabled: true,
            state: AlertState::Pending,
            fired_at: None,
            created_at: Utc::now(),
        }
    }

    /// Set message template
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = template.into();
        self
    }

    pub fn is_pending(&self) -> bool {
        self.state == AlertState::Pending
    }

    /// Move to TRIGGERED. Returns false if the alert already fired.
    pub fn trigger(&mut self, at: DateTime<Utc>) -> bool {
        if self.state == AlertState::Triggered {
            return false;
        }
        self.state = AlertState::Triggered;
        self.fired_at = Some(at);
        true
    }

    /// Whether a move from `previous` to `new` crosses this alert's threshold
    pub fn crossed_by(&self, previous: u64, new: u64) -> bool {
        previous < self.threshold && self.threshold <= new
    }
}

/// Where a user's notifications are delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserChannel {
    /// Telegram chat via the bot API
    Telegram { chat_id: String },
    /// HTTP webhook
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Log to tracing
    Log,
}

impl UserChannel {
    pub fn kind(&self) -> &'static str {
        match self {
            UserChannel::Telegram { .. } => "telegram",
            UserChannel::Webhook { .. } => "webhook",
            UserChannel::Log => "log",
        }
    }
}

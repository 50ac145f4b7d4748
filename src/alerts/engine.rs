//! Threshold evaluation

use std::sync::Arc;

use chrono::Utc;

use super::config::Alert;
use super::store::AlertStore;
use crate::model::ProfileKey;

/// Decides which milestone alerts a new observation fires
pub struct AlertEngine {
    store: Arc<AlertStore>,
}

impl AlertEngine {
    pub fn new(store: Arc<AlertStore>) -> Self {
        Self { store }
    }

    /// Fire every pending alert whose threshold lies in `(previous, new]`.
    ///
    /// Without a previous value nothing fires; the new value is only a
    /// baseline. Decreases never fire.
    pub fn evaluate(&self, profile: &ProfileKey, previous: Option<u64>, new: u64) -> Vec<Alert> {
        let Some(previous) = previous else {
            tracing::debug!(profile = %profile, value = new, "Baseline recorded, no alerts evaluated");
            return Vec::new();
        };
        if new <= previous {
            return Vec::new();
        }

        let fired = self
            .store
            .trigger_where(profile, Utc::now(), |alert| alert.crossed_by(previous, new));

        for alert in &fired {
            tracing::info!(
                profile = %profile,
                alert_id = %alert.id,
                threshold = alert.threshold,
                previous,
                value = new,
                "Alert triggered"
            );
        }

        fired
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }
}

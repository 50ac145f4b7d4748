use chrono::Utc;
use dashmap::DashMap;

use super::config::AlertId;
use crate::model::{DeliveryOutcome, NotificationAttempt};

/// Append-only audit trail of notification attempts
#[derive(Default)]
pub struct AttemptLog {
    attempts: DashMap<AlertId, Vec<NotificationAttempt>>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        alert: AlertId,
        attempt: u32,
        outcome: DeliveryOutcome,
        detail: Option<String>,
    ) -> NotificationAttempt {
        let record = NotificationAttempt {
            alert,
            attempt,
            outcome,
            detail,
            at: Utc::now(),
        };
        self.attempts.entry(alert).or_default().push(record.clone());
        record
    }

    pub fn for_alert(&self, alert: AlertId) -> Vec<NotificationAttempt> {
        self.attempts
            .get(&alert)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// A delivered attempt exists for the alert
    pub fn has_delivered(&self, alert: AlertId) -> bool {
        self.attempts
            .get(&alert)
            .map(|a| a.iter().any(|r| r.outcome == DeliveryOutcome::Delivered))
            .unwrap_or(false)
    }

    /// Alerts whose delivery ended in `Exhausted`
    pub fn exhausted(&self) -> Vec<AlertId> {
        self.attempts
            .iter()
            .filter(|e| {
                e.value()
                    .last()
                    .map(|r| r.outcome == DeliveryOutcome::Exhausted)
                    .unwrap_or(false)
            })
            .map(|e| *e.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let log = AttemptLog::new();
        let alert = AlertId(1);

        log.record(alert, 1, DeliveryOutcome::Failed, Some("timeout".into()));
        assert!(!log.has_delivered(alert));

        log.record(alert, 2, DeliveryOutcome::Delivered, None);
        assert!(log.has_delivered(alert));

        let attempts = log.for_alert(alert);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].attempt, 1);
        assert_eq!(attempts[1].outcome, DeliveryOutcome::Delivered);
        assert!(log.for_alert(AlertId(2)).is_empty());
    }

    #[test]
    fn test_exhausted_listing() {
        let log = AttemptLog::new();
        log.record(AlertId(1), 1, DeliveryOutcome::Failed, None);
        log.record(AlertId(1), 1, DeliveryOutcome::Exhausted, None);
        log.record(AlertId(2), 1, DeliveryOutcome::Delivered, None);

        assert_eq!(log.exhausted(), vec![AlertId(1)]);
    }
}

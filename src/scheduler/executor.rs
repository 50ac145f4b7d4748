//! Per-profile check: fetch, record, evaluate, notify
//!
//! A check runs with the profile lock held. The fetch phase is a small
//! state machine over [`FetchStep`] and runs under the soft time limit. The
//! commit phase only starts after a snapshot was obtained; its store writes
//! happen before any notification is sent, and delivery is cut off at the
//! dispatch deadline so the hard limit never interrupts a half-applied check.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};

use super::queue::CheckProfile;
use crate::alerts::{template, Alert, AlertEngine, AlertId, NotificationDispatcher};
use crate::config::{MonitorConfig, RetryPolicy};
use crate::history::{HistoryError, HistoryStore};
use crate::lock::{LockError, ProfileLock};
use crate::model::{MetricSnapshot, ProfileKey, Provenance};
use crate::profiles::{Directory, ProfileStore};
use crate::source::{MetricSource, SourceError};

/// Executor tunables
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub fetch_retry: RetryPolicy,
    pub lock_ttl: Duration,
    pub soft_time_limit: Duration,
    /// Offset from check start after which pending deliveries are abandoned
    pub dispatch_deadline: Duration,
}

impl From<&MonitorConfig> for ExecutorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            fetch_retry: config.fetch_retry.clone(),
            lock_ttl: config.lock_ttl,
            soft_time_limit: config.soft_time_limit,
            dispatch_deadline: config.dispatch_deadline(),
        }
    }
}

/// Classified result of one fetch attempt
#[derive(Debug)]
pub enum FetchStep {
    Success(MetricSnapshot),
    /// Worth another attempt within this check
    Retryable(SourceError),
    /// Ends the fetch phase of this check
    Permanent(SourceError),
}

impl From<Result<MetricSnapshot, SourceError>> for FetchStep {
    fn from(result: Result<MetricSnapshot, SourceError>) -> Self {
        match result {
            Ok(snapshot) => FetchStep::Success(snapshot),
            Err(e @ SourceError::TransientNetwork(_)) | Err(e @ SourceError::AuthenticationFailed(_)) => {
                FetchStep::Retryable(e)
            }
            Err(e @ SourceError::RateLimited { .. }) | Err(e @ SourceError::ProfileNotFound(_)) => {
                FetchStep::Permanent(e)
            }
        }
    }
}

enum FetchState {
    Attempt { attempt: u32, session_refreshed: bool },
    Backoff { attempt: u32, delay: Duration, last: SourceError, session_refreshed: bool },
    Finished(Result<MetricSnapshot, FetchFailure>),
}

#[derive(Debug)]
enum FetchFailure {
    NotFound(String),
    RateLimited(SourceError),
    Authentication(String),
    Exhausted { attempts: u32, last: SourceError },
    TimedOut,
}

/// Result of a check that ran without error
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Another check holds the profile lock
    Skipped,
    /// Profile unknown or monitoring disabled
    Inactive,
    Updated(CheckSummary),
    /// Rate limited; the next interval tries again
    Deferred { reason: String },
    /// Profile no longer exists on the source; monitoring switched off
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub profile: ProfileKey,
    pub value: u64,
    pub previous: Option<u64>,
    pub provenance: Provenance,
    /// False when the same snapshot had already been stored
    pub recorded: bool,
    pub fired: Vec<AlertId>,
    pub notified: usize,
    pub notify_failed: usize,
}

/// Runs checks against the shared stores
pub struct TaskExecutor {
    source: Arc<MetricSource>,
    history: Arc<HistoryStore>,
    profiles: Arc<ProfileStore>,
    engine: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    directory: Arc<dyn Directory>,
    lock: ProfileLock,
    settings: ExecutorSettings,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<MetricSource>,
        history: Arc<HistoryStore>,
        profiles: Arc<ProfileStore>,
        engine: Arc<AlertEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        directory: Arc<dyn Directory>,
        lock: ProfileLock,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            source,
            history,
            profiles,
            engine,
            dispatcher,
            directory,
            lock,
            settings,
        }
    }

    /// Run one check. The profile lock is released before returning,
    /// including when the check panics.
    pub async fn run(&self, job: &CheckProfile) -> Result<CheckOutcome, TaskError> {
        let profile = &job.profile;
        if !self.profiles.is_enabled(profile) {
            tracing::debug!(profile = %profile, "Profile not monitored, skipping check");
            return Ok(CheckOutcome::Inactive);
        }

        let token = match self.lock.try_acquire(profile, self.settings.lock_ttl).await {
            Ok(token) => token,
            Err(LockError::Busy(_)) => {
                tracing::debug!(profile = %profile, "Check already in progress, skipping");
                return Ok(CheckOutcome::Skipped);
            }
            Err(e) => return Err(TaskError::Lock(e)),
        };

        let result = AssertUnwindSafe(self.run_locked(profile))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(profile = %profile, panic = %message, "Check panicked");
                Err(TaskError::Internal(message))
            });

        if let Err(e) = self.lock.release(profile, &token).await {
            tracing::error!(profile = %profile, error = %e, "Failed to release profile lock");
        }

        result
    }

    async fn run_locked(&self, profile: &ProfileKey) -> Result<CheckOutcome, TaskError> {
        let started = Instant::now();
        let soft_deadline = started + self.settings.soft_time_limit;

        let fetched = match timeout_at(soft_deadline, self.fetch(profile, soft_deadline)).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::TimedOut),
        };

        match fetched {
            Ok(snapshot) => self
                .commit(snapshot, started + self.settings.dispatch_deadline)
                .await
                .map(CheckOutcome::Updated),
            Err(failure) => self.fail(profile, failure),
        }
    }

    async fn fetch(&self, profile: &ProfileKey, deadline: Instant) -> Result<MetricSnapshot, FetchFailure> {
        let policy = &self.settings.fetch_retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut state = FetchState::Attempt {
            attempt: 1,
            session_refreshed: false,
        };

        loop {
            state = match state {
                FetchState::Attempt {
                    attempt,
                    session_refreshed,
                } => match FetchStep::from(self.source.fetch(profile).await) {
                    FetchStep::Success(snapshot) => FetchState::Finished(Ok(snapshot)),
                    FetchStep::Permanent(SourceError::ProfileNotFound(detail)) => {
                        FetchState::Finished(Err(FetchFailure::NotFound(detail)))
                    }
                    FetchStep::Permanent(e) => FetchState::Finished(Err(FetchFailure::RateLimited(e))),
                    FetchStep::Retryable(SourceError::AuthenticationFailed(detail)) => {
                        if session_refreshed {
                            FetchState::Finished(Err(FetchFailure::Authentication(detail)))
                        } else {
                            tracing::info!(profile = %profile, "Session rejected, refreshing");
                            match self.source.refresh_session().await {
                                Ok(()) => FetchState::Attempt {
                                    attempt,
                                    session_refreshed: true,
                                },
                                Err(e) => FetchState::Finished(Err(FetchFailure::Authentication(e.to_string()))),
                            }
                        }
                    }
                    FetchStep::Retryable(e) => {
                        if attempt >= max_attempts {
                            FetchState::Finished(Err(FetchFailure::Exhausted { attempts: attempt, last: e }))
                        } else {
                            FetchState::Backoff {
                                attempt,
                                delay: policy.delay_for(attempt),
                                last: e,
                                session_refreshed,
                            }
                        }
                    }
                },
                FetchState::Backoff {
                    attempt,
                    delay,
                    last,
                    session_refreshed,
                } => {
                    if Instant::now() + delay >= deadline {
                        // Waiting would outlast the time budget
                        FetchState::Finished(Err(FetchFailure::Exhausted { attempts: attempt, last }))
                    } else {
                        tracing::warn!(
                            profile = %profile,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last,
                            "Transient fetch failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        FetchState::Attempt {
                            attempt: attempt + 1,
                            session_refreshed,
                        }
                    }
                }
                FetchState::Finished(result) => return result,
            };
        }
    }

    async fn commit(
        &self,
        snapshot: MetricSnapshot,
        dispatch_deadline: Instant,
    ) -> Result<CheckSummary, TaskError> {
        let profile = snapshot.profile.clone();
        let value = snapshot.value;
        let captured_at = snapshot.captured_at;
        let provenance = snapshot.provenance;
        let previous = self.history.latest(&profile).map(|s| s.value);

        let recorded = self.history.append(snapshot)?;
        let fired = if recorded {
            self.engine.evaluate(&profile, previous, value)
        } else {
            tracing::debug!(profile = %profile, "Snapshot already recorded");
            Vec::new()
        };
        self.profiles.record_success(&profile, value, captured_at);

        let mut notified = 0;
        let mut notify_failed = 0;
        let mut pending = fired.iter();
        while let Some(alert) = pending.next() {
            match timeout_at(dispatch_deadline, self.notify(alert, value, captured_at)).await {
                Ok(true) => notified += 1,
                Ok(false) => notify_failed += 1,
                Err(_) => {
                    tracing::error!(profile = %profile, "Dispatch deadline reached, abandoning notifications");
                    for alert in std::iter::once(alert).chain(pending.by_ref()) {
                        self.dispatcher.abandon(alert, "dispatch deadline reached");
                        notify_failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            profile = %profile,
            value,
            previous = ?previous,
            fired = fired.len(),
            "Profile checked"
        );

        Ok(CheckSummary {
            profile,
            value,
            previous,
            provenance,
            recorded,
            fired: fired.iter().map(|a| a.id).collect(),
            notified,
            notify_failed,
        })
    }

    async fn notify(&self, alert: &Alert, value: u64, captured_at: DateTime<Utc>) -> bool {
        let channel = match self.directory.channel_for(alert.user).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(alert_id = %alert.id, error = %e, "Channel lookup failed");
                None
            }
        };
        let message = template::render(alert, value, alert.fired_at.unwrap_or(captured_at));
        self.dispatcher
            .send(alert, channel.as_ref(), &message)
            .await
            .is_ok()
    }

    fn fail(&self, profile: &ProfileKey, failure: FetchFailure) -> Result<CheckOutcome, TaskError> {
        match failure {
            FetchFailure::NotFound(detail) => {
                self.profiles
                    .disable(profile, Some(format!("profile not found: {}", detail)));
                tracing::error!(profile = %profile, "Profile not found on source, monitoring disabled");
                Ok(CheckOutcome::Disabled)
            }
            FetchFailure::RateLimited(e) => {
                let failures = self.profiles.record_failure(profile, e.to_string());
                tracing::warn!(
                    profile = %profile,
                    consecutive_failures = failures,
                    error = %e,
                    "Transient failure, deferring to next interval"
                );
                Ok(CheckOutcome::Deferred {
                    reason: e.to_string(),
                })
            }
            FetchFailure::Authentication(detail) => {
                self.profiles
                    .record_failure(profile, format!("authentication failed: {}", detail));
                tracing::error!(profile = %profile, error = %detail, "Authentication failed after session refresh");
                Err(TaskError::Authentication(detail))
            }
            FetchFailure::Exhausted { attempts, last } => {
                self.profiles.record_failure(profile, last.to_string());
                tracing::error!(profile = %profile, attempts, error = %last, "Fetch retries exhausted");
                Err(TaskError::RetriesExhausted {
                    attempts,
                    last: last.to_string(),
                })
            }
            FetchFailure::TimedOut => {
                let limit = self.settings.soft_time_limit;
                self.profiles
                    .record_failure(profile, format!("soft time limit of {:?} exceeded", limit));
                tracing::error!(profile = %profile, limit_ms = limit.as_millis() as u64, "Check hit soft time limit");
                Err(TaskError::TimedOut(limit))
            }
        }
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }
}

/// Checks that ended in an operational error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Authentication failed after session refresh: {0}")]
    Authentication(String),

    #[error("Fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Check exceeded time limit of {0:?}")]
    TimedOut(Duration),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertState, NotifierError};
    use crate::model::DeliveryOutcome;
    use crate::scheduler::queue::CheckReason;
    use crate::scheduler::testing::{Harness, Step};

    fn job(h: &Harness) -> CheckProfile {
        CheckProfile::new(h.key.clone(), CheckReason::Scheduled)
    }

    #[tokio::test]
    async fn test_milestone_scenario() {
        let h = Harness::new(vec![Step::Count(950), Step::Count(1005)]);
        let alert = h.add_alert(1000);

        let baseline = h.executor.run(&job(&h)).await.unwrap();
        assert!(matches!(baseline, CheckOutcome::Updated(ref s) if s.fired.is_empty()));

        let outcome = h.executor.run(&job(&h)).await.unwrap();
        let summary = match outcome {
            CheckOutcome::Updated(summary) => summary,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(summary.value, 1005);
        assert_eq!(summary.previous, Some(950));
        assert_eq!(summary.fired, vec![alert]);
        assert_eq!(summary.notified, 1);

        assert_eq!(h.history.len(&h.key), 2);
        assert_eq!(h.history.latest(&h.key).unwrap().value, 1005);

        let stored = h.alerts.get(alert).unwrap();
        assert_eq!(stored.state, AlertState::Triggered);
        assert!(stored.fired_at.is_some());

        let attempts = h.attempts.for_alert(alert);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, DeliveryOutcome::Delivered);

        let profile = h.profiles.get(&h.key).unwrap();
        assert_eq!(profile.last_known_value, Some(1005));
        assert!(profile.last_checked.is_some());

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("<b>1,000</b>"));
        assert!(sent[0].contains("@watched"));
    }

    #[tokio::test]
    async fn test_threshold_fires_exactly_once() {
        let h = Harness::new(vec![Step::Count(900), Step::Count(1050), Step::Count(1200)]);
        let alert = h.add_alert(1000);

        for _ in 0..3 {
            h.executor.run(&job(&h)).await.unwrap();
        }

        assert_eq!(h.messenger.sent().len(), 1);
        assert_eq!(h.attempts.for_alert(alert).len(), 1);
        assert_eq!(h.history.len(&h.key), 3);
    }

    #[tokio::test]
    async fn test_no_alert_on_first_snapshot() {
        let h = Harness::new(vec![Step::Count(5000)]);
        let alert = h.add_alert(100);

        h.executor.run(&job(&h)).await.unwrap();

        assert_eq!(h.alerts.get(alert).unwrap().state, AlertState::Pending);
        assert!(h.messenger.sent().is_empty());
        assert_eq!(h.history.len(&h.key), 1);
    }

    #[tokio::test]
    async fn test_held_lock_skips_without_writes() {
        let h = Harness::new(vec![Step::Count(10)]);
        let token = h.lock.try_acquire(&h.key, Duration::from_secs(60)).await.unwrap();

        assert_eq!(h.executor.run(&job(&h)).await.unwrap(), CheckOutcome::Skipped);
        assert_eq!(h.provider.calls(), 0);
        assert!(h.history.is_empty(&h.key));
        assert!(h.profiles.get(&h.key).unwrap().last_checked.is_none());

        h.lock.release(&h.key, &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_checks_single_winner() {
        let h = Harness::new(vec![Step::Slow(Duration::from_millis(50), 10), Step::Count(20)]);

        let job = job(&h);
        let (a, b) = tokio::join!(h.executor.run(&job), h.executor.run(&job));
        let outcomes = [a.unwrap(), b.unwrap()];

        let updated = outcomes
            .iter()
            .filter(|o| matches!(o, CheckOutcome::Updated(_)))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, CheckOutcome::Skipped))
            .count();
        assert_eq!((updated, skipped), (1, 1));
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.history.len(&h.key), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_once() {
        let h = Harness::new(vec![
            Step::Fail(SourceError::AuthenticationFailed("login_required".into())),
            Step::Count(321),
        ]);

        let outcome = h.executor.run(&job(&h)).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Updated(ref s) if s.value == 321));
        assert_eq!(h.history.len(&h.key), 1);
        assert_eq!(h.provider.calls(), 2);
        // Initial login plus one refresh
        assert_eq!(h.sessions.login_count(), 2);
    }

    #[tokio::test]
    async fn test_repeated_auth_failure_stops() {
        let h = Harness::new(vec![
            Step::Fail(SourceError::AuthenticationFailed("login_required".into())),
            Step::Fail(SourceError::AuthenticationFailed("login_required".into())),
        ]);

        let err = h.executor.run(&job(&h)).await.unwrap_err();
        assert!(matches!(err, TaskError::Authentication(_)));

        let profile = h.profiles.get(&h.key).unwrap();
        assert!(profile.last_checked.is_none());
        assert!(profile.enabled);
        assert_eq!(profile.consecutive_failures, 1);
        assert!(h.history.is_empty(&h.key));
        assert!(h.lock_is_free().await);
    }

    #[tokio::test]
    async fn test_rate_limited_three_ticks() {
        let limited = || Step::Fail(SourceError::RateLimited { retry_after: None });
        let h = Harness::new(vec![limited(), limited(), limited()]);
        let alert = h.add_alert(1);

        for _ in 0..3 {
            let outcome = h.executor.run(&job(&h)).await.unwrap();
            assert!(matches!(outcome, CheckOutcome::Deferred { .. }));
        }

        let profile = h.profiles.get(&h.key).unwrap();
        assert!(profile.last_checked.is_none());
        assert!(profile.enabled);
        assert_eq!(profile.consecutive_failures, 3);
        assert!(h.history.is_empty(&h.key));
        assert_eq!(h.alerts.get(alert).unwrap().state, AlertState::Pending);
        // No retry within a tick
        assert_eq!(h.provider.calls(), 3);
        assert!(h.lock_is_free().await);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let transient = || Step::Fail(SourceError::TransientNetwork("reset".into()));
        let h = Harness::new(vec![transient(), transient(), Step::Count(77)]);

        let outcome = h.executor.run(&job(&h)).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Updated(ref s) if s.value == 77));
        assert_eq!(h.provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_retries_exhausted() {
        let transient = || Step::Fail(SourceError::TransientNetwork("reset".into()));
        let h = Harness::new(vec![transient(), transient(), transient(), Step::Count(1)]);

        let err = h.executor.run(&job(&h)).await.unwrap_err();
        assert!(matches!(err, TaskError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(h.provider.calls(), 3);
        assert!(h.history.is_empty(&h.key));
        assert!(h.lock_is_free().await);
    }

    #[tokio::test]
    async fn test_profile_not_found_disables() {
        let h = Harness::new(vec![Step::Fail(SourceError::ProfileNotFound("watched".into()))]);

        assert_eq!(h.executor.run(&job(&h)).await.unwrap(), CheckOutcome::Disabled);
        assert!(!h.profiles.is_enabled(&h.key));
        assert_eq!(h.provider.calls(), 1);

        // Disabled profiles are not checked again
        assert_eq!(h.executor.run(&job(&h)).await.unwrap(), CheckOutcome::Inactive);
        assert_eq!(h.provider.calls(), 1);
        assert!(h.lock_is_free().await);
    }

    #[tokio::test]
    async fn test_soft_time_limit_aborts_gracefully() {
        let h = Harness::with_limits(
            vec![Step::Slow(Duration::from_secs(10), 1)],
            Duration::from_millis(50),
            Duration::from_secs(5),
        );

        let err = h.executor.run(&job(&h)).await.unwrap_err();
        assert!(matches!(err, TaskError::TimedOut(_)));
        assert!(h.history.is_empty(&h.key));
        assert_eq!(h.profiles.get(&h.key).unwrap().consecutive_failures, 1);
        assert!(h.lock_is_free().await);
    }

    #[tokio::test]
    async fn test_dispatch_deadline_abandons_remaining_alerts() {
        let h = Harness::with_limits(
            vec![Step::Count(950), Step::Count(1005)],
            Duration::from_secs(5),
            Duration::from_millis(50),
        );
        let first = h.add_alert(1000);
        let second = h.add_alert(1001);
        h.executor.run(&job(&h)).await.unwrap();
        h.messenger.stall_for(Duration::from_secs(3600));

        let summary = match h.executor.run(&job(&h)).await.unwrap() {
            CheckOutcome::Updated(summary) => summary,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(summary.fired.len(), 2);
        assert_eq!(summary.notified, 0);
        assert_eq!(summary.notify_failed, 2);

        // Writes landed before the first send
        assert_eq!(h.profiles.get(&h.key).unwrap().last_known_value, Some(1005));
        let mut exhausted = h.attempts.exhausted();
        exhausted.sort();
        assert_eq!(exhausted, vec![first, second]);
        assert_eq!(h.alerts.get(first).unwrap().state, AlertState::Triggered);
        // The second alert never reached the messenger
        assert_eq!(h.messenger.sent().len(), 1);
        assert!(h.lock_is_free().await);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_alert_triggered() {
        let h = Harness::new(vec![Step::Count(90), Step::Count(110), Step::Count(130)]);
        let alert = h.add_alert(100);
        h.messenger.fail_with(|| NotifierError::Unavailable("telegram down".into()));

        h.executor.run(&job(&h)).await.unwrap();
        let outcome = h.executor.run(&job(&h)).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Updated(ref s) if s.notify_failed == 1));

        assert_eq!(h.alerts.get(alert).unwrap().state, AlertState::Triggered);
        assert_eq!(h.attempts.exhausted(), vec![alert]);
        assert_eq!(h.profiles.get(&h.key).unwrap().last_known_value, Some(110));

        // Not re-driven by later checks
        let sent_before = h.messenger.sent().len();
        h.executor.run(&job(&h)).await.unwrap();
        assert_eq!(h.messenger.sent().len(), sent_before);
    }

    #[tokio::test]
    async fn test_panic_releases_lock() {
        let h = Harness::new(vec![Step::Panic]);

        let err = h.executor.run(&job(&h)).await.unwrap_err();
        assert!(matches!(err, TaskError::Internal(_)));
        assert!(h.lock_is_free().await);
    }

    #[test]
    fn test_fetch_step_classification() {
        let step = |e: SourceError| FetchStep::from(Err(e));
        assert!(matches!(step(SourceError::TransientNetwork("x".into())), FetchStep::Retryable(_)));
        assert!(matches!(step(SourceError::AuthenticationFailed("x".into())), FetchStep::Retryable(_)));
        assert!(matches!(step(SourceError::RateLimited { retry_after: None }), FetchStep::Permanent(_)));
        assert!(matches!(step(SourceError::ProfileNotFound("x".into())), FetchStep::Permanent(_)));
    }
}

//! Periodic scheduling of profile checks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::queue::{CheckProfile, CheckReason, JobSender, QueueError};
use crate::model::ProfileKey;
use crate::profiles::ProfileStore;

/// What one scheduling tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub enqueued: usize,
    /// Due, but already enqueued within the last interval
    pub recently_enqueued: usize,
    pub dropped: usize,
}

/// Emits one check per due profile on every tick
pub struct Scheduler {
    profiles: Arc<ProfileStore>,
    queue: JobSender,
    interval: Duration,
    tick_interval: Duration,
    /// Last enqueue per profile, so a slow or failing check is not queued twice
    last_enqueued: Mutex<HashMap<ProfileKey, DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(
        profiles: Arc<ProfileStore>,
        queue: JobSender,
        interval: Duration,
        tick_interval: Duration,
    ) -> Self {
        Self {
            profiles,
            queue,
            interval,
            tick_interval,
            last_enqueued: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue checks for every profile due at `now`
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let due = self.profiles.due(now, self.interval);
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        let mut last_enqueued = self.last_enqueued.lock();
        for profile in due {
            let recent = last_enqueued
                .get(&profile)
                .and_then(|at| (now - *at).to_std().ok())
                .map(|elapsed| elapsed < self.interval)
                .unwrap_or(false);
            if recent {
                report.recently_enqueued += 1;
                continue;
            }

            match self
                .queue
                .try_enqueue(CheckProfile::new(profile.clone(), CheckReason::Scheduled))
            {
                Ok(()) => {
                    last_enqueued.insert(profile, now);
                    report.enqueued += 1;
                }
                Err(e @ QueueError::Full(_)) => {
                    tracing::warn!(error = %e, "Check not scheduled");
                    report.dropped += 1;
                }
                Err(QueueError::Closed) => {
                    tracing::warn!("Job queue closed, stopping tick");
                    report.dropped += 1;
                    break;
                }
            }
        }

        // Forget profiles that are no longer monitored
        last_enqueued.retain(|profile, _| self.profiles.is_enabled(profile));
        report
    }

    /// Enqueue a check outside the schedule
    pub fn enqueue_now(&self, profile: ProfileKey) -> Result<(), QueueError> {
        self.queue
            .try_enqueue(CheckProfile::new(profile, CheckReason::Manual))
    }

    /// Free slots left in the job queue
    pub fn queue_remaining(&self) -> usize {
        self.queue.remaining()
    }

    /// Run ticks until `shutdown` flips to true
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                tick_secs = self.tick_interval.as_secs(),
                "Scheduler started"
            );

            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.tick(Utc::now());
                        if report.due > 0 {
                            tracing::info!(
                                due = report.due,
                                enqueued = report.enqueued,
                                recently_enqueued = report.recently_enqueued,
                                dropped = report.dropped,
                                "Scheduling tick"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

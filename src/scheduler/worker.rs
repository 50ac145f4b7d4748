//! Worker pool draining the job queue

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use super::executor::{CheckOutcome, TaskExecutor};
use super::queue::{CheckProfile, JobReceiver};

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    checks: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    inactive: AtomicU64,
    deferred: AtomicU64,
    disabled: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    alerts_fired: AtomicU64,
    notifications_failed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub checks: u64,
    pub updated: u64,
    pub skipped: u64,
    pub inactive: u64,
    pub deferred: u64,
    pub disabled: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub alerts_fired: u64,
    pub notifications_failed: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, outcome: &CheckOutcome) {
        let counter = match outcome {
            CheckOutcome::Updated(summary) => {
                self.alerts_fired
                    .fetch_add(summary.fired.len() as u64, Ordering::Relaxed);
                self.notifications_failed
                    .fetch_add(summary.notify_failed as u64, Ordering::Relaxed);
                &self.updated
            }
            CheckOutcome::Skipped => &self.skipped,
            CheckOutcome::Inactive => &self.inactive,
            CheckOutcome::Deferred { .. } => &self.deferred,
            CheckOutcome::Disabled => &self.disabled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            inactive: self.inactive.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }
}

/// Fixed set of workers sharing one queue. Jobs for distinct profiles run
/// in parallel; same-profile jobs are serialized by the profile lock.
pub struct WorkerPool {
    executor: Arc<TaskExecutor>,
    receiver: JobReceiver,
    workers: usize,
    hard_time_limit: Duration,
    stats: Arc<PipelineStats>,
}

impl WorkerPool {
    pub fn new(
        executor: Arc<TaskExecutor>,
        receiver: JobReceiver,
        workers: usize,
        hard_time_limit: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            executor,
            receiver,
            workers: workers.max(1),
            hard_time_limit,
            stats,
        }
    }

    /// Spawn the workers. They stop when `shutdown` flips to true or the
    /// queue closes; a job already running is finished first.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        tracing::info!(workers = self.workers, "Starting worker pool");
        let pool = Arc::new(self);

        (0..pool.workers)
            .map(|id| {
                let pool = Arc::clone(&pool);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        tokio::select! {
                            job = pool.receiver.next() => match job {
                                Some(job) => pool.run_job(job).await,
                                None => break,
                            },
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::debug!(worker = id, "Worker stopped");
                })
            })
            .collect()
    }

    /// Run one job under the hard time limit.
    ///
    /// On expiry the task is aborted and its profile lock is left to expire.
    async fn run_job(&self, job: CheckProfile) {
        self.stats.checks.fetch_add(1, Ordering::Relaxed);
        let profile = job.profile.clone();

        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.run(&job).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.hard_time_limit, handle).await {
            Ok(Ok(Ok(outcome))) => self.stats.record(&outcome),
            Ok(Ok(Err(e))) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(profile = %profile, error = %e, "Check failed");
            }
            Ok(Err(join_error)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(profile = %profile, error = %join_error, "Check task died");
            }
            Err(_) => {
                abort.abort();
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    profile = %profile,
                    limit_secs = self.hard_time_limit.as_secs(),
                    "Check killed at hard time limit"
                );
            }
        }
    }
}

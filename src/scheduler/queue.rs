use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::model::ProfileKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckReason {
    Scheduled,
    /// Requested through the service or API
    Manual,
}

/// Job asking a worker to check one profile
#[derive(Debug, Clone, PartialEq)]
pub struct CheckProfile {
    pub profile: ProfileKey,
    pub enqueued_at: DateTime<Utc>,
    pub reason: CheckReason,
}

impl CheckProfile {
    pub fn new(profile: ProfileKey, reason: CheckReason) -> Self {
        Self {
            profile,
            enqueued_at: Utc::now(),
            reason,
        }
    }
}

/// Bounded job queue shared by the scheduler and the workers
pub fn job_queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        JobSender { tx },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::Sender<CheckProfile>,
}

impl JobSender {
    /// Enqueue without waiting; a full queue rejects the job
    pub fn try_enqueue(&self, job: CheckProfile) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => QueueError::Full(job.profile.to_string()),
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Free slots left in the queue
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

/// Receiving end; clones compete for jobs
#[derive(Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<CheckProfile>>>,
}

impl JobReceiver {
    /// Next job, or `None` once every sender is gone
    pub async fn next(&self) -> Option<CheckProfile> {
        self.rx.lock().await.recv().await
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue full, dropped check for {0}")]
    Full(String),

    #[error("Job queue closed")]
    Closed,
}

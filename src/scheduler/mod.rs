//! Scheduling and execution of profile checks
//!
//! The [`Scheduler`] wakes on a fixed tick and queues one [`CheckProfile`]
//! job per due profile. A [`WorkerPool`] drains the queue and hands each job
//! to the [`TaskExecutor`], which runs fetch, record, evaluate and notify
//! under the profile lock.

pub mod executor;
pub mod queue;
pub mod ticker;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::{CheckOutcome, CheckSummary, ExecutorSettings, FetchStep, TaskError, TaskExecutor};
pub use queue::{job_queue, CheckProfile, CheckReason, JobReceiver, JobSender, QueueError};
pub use ticker::{Scheduler, TickReport};
pub use worker::{PipelineStats, StatsSnapshot, WorkerPool};

//! Core records shared by the monitoring pipeline

pub mod attempt;
pub mod profile;
pub mod snapshot;

pub use attempt::{DeliveryOutcome, NotificationAttempt};
pub use profile::{InvalidProfileKey, MonitoredProfile, ProfileKey, UserId};
pub use snapshot::{MetricSnapshot, Provenance};

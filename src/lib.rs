//! socialpulse: Follower Milestone Monitoring
//!
//! Periodically reads follower counts of registered social profiles,
//! keeps an append-only history per profile and notifies users once when
//! a profile crosses a threshold they asked to be told about.
//!
//! # Features
//!
//! - **Metric Source Adapter**: Session caching, pacing and error classification
//! - **History Store**: Idempotent append, latest value, lazy range queries
//! - **Alert Engine**: Fire-once threshold crossings on increases only
//! - **Notification Dispatcher**: Telegram/webhook delivery with retry and an attempt log
//! - **Profile Lock**: Non-blocking per-profile exclusion with TTL
//! - **Scheduler**: Interval ticks feeding a bounded worker pool with time limits
//! - **Reporting API**: Status, history, alerts and growth over HTTP
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socialpulse::config::MonitorConfig;
//! use socialpulse::profiles::MemoryDirectory;
//! use socialpulse::service::{Collaborators, MonitorService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::from_env();
//! let directory = Arc::new(MemoryDirectory::new());
//! let collaborators = Collaborators::from_config(&config, directory)?;
//! let service = MonitorService::new(config, collaborators)?;
//!
//! service.register_profile("natgeo", None).await?;
//! service.add_alert("natgeo", 300_000_000, None)?;
//! service.start()?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod history;
pub mod lock;
pub mod model;
pub mod profiles;
pub mod scheduler;
pub mod seed;
pub mod service;
pub mod source;

// Re-export commonly used types
pub use config::{ConfigError, MonitorConfig};
pub use model::{MetricSnapshot, MonitoredProfile, ProfileKey, UserId};
pub use service::{Collaborators, MonitorService, ServiceError};

//! Per-profile snapshot history and growth reporting

pub mod analytics;
pub mod store;

pub use analytics::{ChangeType, GrowthSummary, PeriodChange};
pub use store::{HistoryError, HistoryStats, HistoryStore, SnapshotRange};

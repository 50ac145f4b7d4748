//! Growth figures derived from stored history

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::store::HistoryStore;
use crate::model::{MetricSnapshot, ProfileKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Increase,
    Decrease,
    NoChange,
}

impl ChangeType {
    fn of(change: i64) -> Self {
        match change {
            c if c > 0 => ChangeType::Increase,
            c if c < 0 => ChangeType::Decrease,
            _ => ChangeType::NoChange,
        }
    }
}

/// Latest value compared with the value at the start of a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodChange {
    pub current: u64,
    pub previous: u64,
    pub absolute_change: i64,
    pub percentage_change: f64,
    pub change_type: ChangeType,
}

impl PeriodChange {
    /// Compare the latest snapshot with the last one captured at or before
    /// `now - window`. With no snapshot that old, the change is zero.
    pub fn compute(
        history: &HistoryStore,
        profile: &ProfileKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Option<Self> {
        let current = history.latest(profile)?;
        let previous = history
            .range(profile, DateTime::<Utc>::MIN_UTC, now - window)
            .last()
            .map(|s| s.value)
            .unwrap_or(current.value);

        let absolute_change = current.value as i64 - previous as i64;
        Some(Self {
            current: current.value,
            previous,
            absolute_change,
            percentage_change: percentage_change(previous, current.value),
            change_type: ChangeType::of(absolute_change),
        })
    }
}

/// A point in the series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extreme {
    pub value: u64,
    pub at: DateTime<Utc>,
}

/// Growth over a window of snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthSummary {
    pub current: u64,
    pub period_start: u64,
    pub total_change: i64,
    pub percentage_change: f64,
    pub average_daily_growth: f64,
    pub peak: Extreme,
    pub low: Extreme,
    pub data_points: usize,
}

impl GrowthSummary {
    /// Summarize snapshots given oldest first; `None` when there are none
    pub fn from_snapshots<I>(snapshots: I) -> Option<Self>
    where
        I: IntoIterator<Item = MetricSnapshot>,
    {
        let mut iter = snapshots.into_iter();
        let first = iter.next()?;

        let mut last = first.clone();
        let mut peak = Extreme {
            value: first.value,
            at: first.captured_at,
        };
        let mut low = peak.clone();
        let mut data_points = 1;

        for snapshot in iter {
            // Ties keep the earliest occurrence
            if snapshot.value > peak.value {
                peak = Extreme {
                    value: snapshot.value,
                    at: snapshot.captured_at,
                };
            }
            if snapshot.value < low.value {
                low = Extreme {
                    value: snapshot.value,
                    at: snapshot.captured_at,
                };
            }
            data_points += 1;
            last = snapshot;
        }

        let total_change = last.value as i64 - first.value as i64;
        let average_daily_growth = if data_points > 1 {
            let days = (last.captured_at - first.captured_at).num_days().max(1);
            total_change as f64 / days as f64
        } else {
            0.0
        };

        Some(Self {
            current: last.value,
            period_start: first.value,
            total_change,
            percentage_change: percentage_change(first.value, last.value),
            average_daily_growth,
            peak,
            low,
            data_points,
        })
    }
}

/// Percent change from `old` to `new`, rounded to two decimals.
/// Growth from zero counts as 100%.
pub fn percentage_change(old: u64, new: u64) -> f64 {
    if old == 0 {
        return if new > 0 { 100.0 } else { 0.0 };
    }
    let pct = (new as f64 - old as f64) / old as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

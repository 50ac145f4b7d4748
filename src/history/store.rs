use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::model::{MetricSnapshot, ProfileKey};

type Series = Arc<RwLock<Vec<MetricSnapshot>>>;

/// Append-only snapshot series, one per profile.
///
/// Each series sits behind its own lock, so reading or writing one profile
/// never contends with another.
#[derive(Default)]
pub struct HistoryStore {
    series: DashMap<ProfileKey, Series>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot.
    ///
    /// Returns `Ok(false)` when a snapshot with the same timestamp is already
    /// stored for the profile, `Ok(true)` when the snapshot was added.
    pub fn append(&self, snapshot: MetricSnapshot) -> Result<bool, HistoryError> {
        let series = self.series_for(&snapshot.profile);
        let mut series = series.write();

        match series.last() {
            Some(last) if last.captured_at == snapshot.captured_at => return Ok(false),
            Some(last) if last.captured_at > snapshot.captured_at => {
                // Redelivered job: only an exact timestamp match is benign
                if series
                    .binary_search_by_key(&snapshot.captured_at, |s| s.captured_at)
                    .is_ok()
                {
                    return Ok(false);
                }
                return Err(HistoryError::OutOfOrder {
                    profile: snapshot.profile.to_string(),
                    captured_at: snapshot.captured_at,
                    latest: last.captured_at,
                });
            }
            _ => {}
        }

        series.push(snapshot);
        Ok(true)
    }

    pub fn latest(&self, profile: &ProfileKey) -> Option<MetricSnapshot> {
        let series = self.series.get(profile).map(|s| Arc::clone(&s))?;
        let series = series.read();
        series.last().cloned()
    }

    /// Snapshots with `from <= captured_at <= to`, oldest first.
    ///
    /// The bounds are resolved when the range is created; snapshots appended
    /// afterwards are not visited.
    pub fn range(&self, profile: &ProfileKey, from: DateTime<Utc>, to: DateTime<Utc>) -> SnapshotRange {
        let Some(series) = self.series.get(profile).map(|s| Arc::clone(&s)) else {
            return SnapshotRange::empty();
        };
        if from > to {
            return SnapshotRange::empty();
        }

        let (start, end) = {
            let guard = series.read();
            let start = guard.partition_point(|s| s.captured_at < from);
            let end = guard.partition_point(|s| s.captured_at <= to);
            (start, end)
        };

        SnapshotRange {
            series: Some(series),
            next: start,
            end,
        }
    }

    /// Number of stored snapshots for a profile
    pub fn len(&self, profile: &ProfileKey) -> usize {
        self.series.get(profile).map(|s| s.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self, profile: &ProfileKey) -> bool {
        self.len(profile) == 0
    }

    pub fn stats(&self) -> HistoryStats {
        let mut stats = HistoryStats::default();
        for entry in self.series.iter() {
            stats.profiles += 1;
            stats.snapshots += entry.value().read().len();
        }
        stats
    }

    fn series_for(&self, profile: &ProfileKey) -> Series {
        if let Some(series) = self.series.get(profile) {
            return Arc::clone(&series);
        }
        Arc::clone(&self.series.entry(profile.clone()).or_default())
    }
}

/// Lazy ascending iterator over a slice of one profile's history
pub struct SnapshotRange {
    series: Option<Series>,
    next: usize,
    end: usize,
}

impl SnapshotRange {
    fn empty() -> Self {
        Self {
            series: None,
            next: 0,
            end: 0,
        }
    }
}

impl Iterator for SnapshotRange {
    type Item = MetricSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let series = self.series.as_ref()?;
        let item = series.read().get(self.next).cloned();
        self.next += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SnapshotRange {}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HistoryStats {
    pub profiles: usize,
    pub snapshots: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HistoryError {
    #[error("Snapshot for {profile} at {captured_at} precedes latest at {latest}")]
    OutOfOrder {
        profile: String,
        captured_at: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::{LockError, LockStore};

/// Background sweep of expired lock records
pub struct LockJanitor {
    store: Arc<dyn LockStore>,
    interval: Duration,
}

impl LockJanitor {
    pub fn new(store: Arc<dyn LockStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run one sweep
    pub async fn sweep(&self) -> Result<usize, LockError> {
        let purged = self.store.purge_expired().await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired profile locks");
        }
        Ok(purged)
    }

    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Lock janitor started with interval {:?}", self.interval);

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::warn!(error = %e, "Lock sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Lock janitor stopped");
        })
    }
}

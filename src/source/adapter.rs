use std::sync::Arc;

use chrono::Utc;

use super::{MetricProvider, Pacer, SessionManager, SourceError};
use crate::model::{MetricSnapshot, ProfileKey, Provenance};

/// Rate-aware, session-managing client for the metric provider
pub struct MetricSource {
    provider: Arc<dyn MetricProvider>,
    sessions: Arc<SessionManager>,
    pacer: Pacer,
}

impl MetricSource {
    pub fn new(provider: Arc<dyn MetricProvider>, sessions: Arc<SessionManager>, pacer: Pacer) -> Self {
        Self {
            provider,
            sessions,
            pacer,
        }
    }

    /// Fetch the current follower count of a profile.
    ///
    /// Every call waits a randomized delay first. An authentication failure
    /// drops the live session, so a caller that calls `refresh_session` and
    /// retries does so with new credentials.
    pub async fn fetch(&self, profile: &ProfileKey) -> Result<MetricSnapshot, SourceError> {
        let session = self.sessions.ensure_session().await?;

        let delay = self.pacer.pause().await;
        tracing::debug!(profile = %profile, delay_ms = delay.as_millis() as u64, "Fetching follower count");

        match self.provider.follower_count(&session, profile).await {
            Ok(raw) => {
                let provenance = if raw.exact {
                    Provenance::Success
                } else {
                    Provenance::Estimated
                };
                Ok(MetricSnapshot::new(profile.clone(), raw.value, Utc::now(), provenance))
            }
            Err(e) => {
                if matches!(e, SourceError::AuthenticationFailed(_)) {
                    self.sessions.invalidate(&session).await;
                }
                tracing::debug!(profile = %profile, kind = ?e.kind(), error = %e, "Fetch failed");
                Err(e)
            }
        }
    }

    /// Replace the session rejected by the last failed fetch
    pub async fn refresh_session(&self) -> Result<(), SourceError> {
        self.sessions.refresh().await.map(|_| ())
    }

    /// Verify the source is reachable with a usable session
    pub async fn check_connection(&self) -> Result<(), SourceError> {
        let session = self.sessions.ensure_session().await?;
        if self.provider.validate(&session).await? {
            Ok(())
        } else {
            self.sessions.invalidate(&session).await;
            Err(SourceError::AuthenticationFailed(
                "session rejected by metric source".to_string(),
            ))
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}

//! Metric source adapter
//!
//! Wraps the unreliable follower-count provider: owns the login session,
//! paces calls with a randomized delay and classifies every failure into a
//! [`SourceError`] kind the executor can act on.

pub mod adapter;
pub mod http;
pub mod pacer;
pub mod session;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::SourceCredentials;
use crate::model::ProfileKey;

pub use adapter::MetricSource;
pub use http::HttpMetricProvider;
pub use pacer::Pacer;
pub use session::{
    FileSessionStore, MemorySessionStore, Session, SessionManager, SessionStore, SessionStoreError,
};

/// Follower count as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCount {
    pub value: u64,
    /// False when the provider only exposed an abbreviated figure
    pub exact: bool,
}

impl RawCount {
    pub fn exact(value: u64) -> Self {
        Self { value, exact: true }
    }

    pub fn estimated(value: u64) -> Self {
        Self {
            value,
            exact: false,
        }
    }
}

/// Raw access to the external metric provider
#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// Log in with credentials and return a fresh session
    async fn login(&self, credentials: &SourceCredentials) -> Result<Session, SourceError>;

    /// Check whether a (cached) session is still accepted.
    /// `Ok(false)` means the session must be replaced.
    async fn validate(&self, session: &Session) -> Result<bool, SourceError>;

    /// Current follower count of a profile
    async fn follower_count(
        &self,
        session: &Session,
        profile: &ProfileKey,
    ) -> Result<RawCount, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    AuthenticationFailed,
    RateLimited,
    ProfileNotFound,
    TransientNetwork,
}

/// Classified metric source failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Authentication with metric source failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limited by metric source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Profile not found on metric source: {0}")]
    ProfileNotFound(String),

    #[error("Transient metric source error: {0}")]
    TransientNetwork(String),
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::AuthenticationFailed(_) => SourceErrorKind::AuthenticationFailed,
            SourceError::RateLimited { .. } => SourceErrorKind::RateLimited,
            SourceError::ProfileNotFound(_) => SourceErrorKind::ProfileNotFound,
            SourceError::TransientNetwork(_) => SourceErrorKind::TransientNetwork,
        }
    }

    /// The profile can no longer be resolved; retrying is pointless
    pub fn is_permanent(&self) -> bool {
        matches!(self, SourceError::ProfileNotFound(_))
    }

    /// May be retried immediately under a backoff policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::TransientNetwork(_))
    }
}

//! Source session lifecycle
//!
//! A [`SessionManager`] is owned by one adapter instance. It hands out the
//! live session, reloads a cached one from its [`SessionStore`] on startup,
//! refreshes proactively once a session is older than the configured age and
//! reactively when the provider rejects it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{MetricProvider, SourceError};
use crate::config::SourceCredentials;

/// Authenticated context with the metric source
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_agent: user_agent.into(),
            created_at: Utc::now(),
        }
    }

    /// Age at `now`; zero if the session claims to be from the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= max_age
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Where sessions are cached between process restarts
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<Session>, SessionStoreError>;
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;
}

/// JSON file holding the last session, readable by the owner only
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(session)?).await?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// In-process session cache
#[derive(Default)]
pub struct MemorySessionStore {
    session: parking_lot::Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: parking_lot::Mutex::new(Some(session)),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.session.lock().clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.session.lock().clone())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        *self.session.lock() = Some(session.clone());
        Ok(())
    }
}

#[derive(Default)]
struct SessionState {
    live: Option<Arc<Session>>,
    /// Token of the last session the provider rejected
    rejected: Option<String>,
}

impl SessionState {
    fn is_rejected(&self, session: &Session) -> bool {
        self.rejected.as_deref() == Some(session.token.as_str())
    }
}

/// Owns the live session of one adapter
pub struct SessionManager {
    provider: Arc<dyn MetricProvider>,
    store: Arc<dyn SessionStore>,
    credentials: Option<SourceCredentials>,
    max_age: Duration,
    /// Held across provider calls so concurrent workers trigger a single login
    state: Mutex<SessionState>,
    logins: AtomicU64,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn MetricProvider>,
        store: Arc<dyn SessionStore>,
        credentials: Option<SourceCredentials>,
        max_age: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            credentials,
            max_age,
            state: Mutex::new(SessionState::default()),
            logins: AtomicU64::new(0),
        }
    }

    /// Return a usable session, loading, validating or logging in as needed
    pub async fn ensure_session(&self) -> Result<Arc<Session>, SourceError> {
        let mut state = self.state.lock().await;

        if let Some(session) = state.live.as_ref() {
            if !session.is_older_than(self.max_age, Utc::now()) {
                return Ok(Arc::clone(session));
            }
            tracing::info!(
                age_secs = session.age(Utc::now()).as_secs(),
                "Source session reached max age, refreshing"
            );
            let session = self.login().await?;
            state.live = Some(Arc::clone(&session));
            return Ok(session);
        }

        if let Some(session) = self.load_cached(&state).await? {
            state.live = Some(Arc::clone(&session));
            return Ok(session);
        }

        let session = self.login().await?;
        state.live = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Replace a rejected session.
    ///
    /// When another caller already established a session the provider has
    /// not rejected, that one is returned without a new login.
    pub async fn refresh(&self) -> Result<Arc<Session>, SourceError> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.live.as_ref() {
            if !state.is_rejected(session) {
                tracing::debug!("Source session already refreshed");
                return Ok(Arc::clone(session));
            }
        }

        let session = self.login().await?;
        state.live = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Mark `rejected` as refused by the provider and drop it if it is
    /// still the live session; a newer live session is kept.
    pub async fn invalidate(&self, rejected: &Session) {
        let mut state = self.state.lock().await;
        state.rejected = Some(rejected.token.clone());
        let is_live = state
            .live
            .as_ref()
            .map(|s| s.token == rejected.token)
            .unwrap_or(false);
        if is_live {
            state.live = None;
            tracing::debug!("Source session invalidated");
        }
    }

    /// Number of logins performed by this manager
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    async fn load_cached(&self, state: &SessionState) -> Result<Option<Arc<Session>>, SourceError> {
        let cached = match self.store.load().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::info!("No cached source session found");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load cached source session");
                return Ok(None);
            }
        };

        if state.is_rejected(&cached) {
            tracing::info!("Cached source session was rejected earlier");
            return Ok(None);
        }
        if cached.is_older_than(self.max_age, Utc::now()) {
            tracing::info!("Cached source session is too old");
            return Ok(None);
        }

        match self.provider.validate(&cached).await {
            Ok(true) => {
                tracing::info!("Loaded cached source session");
                Ok(Some(Arc::new(cached)))
            }
            Ok(false) | Err(SourceError::AuthenticationFailed(_)) => {
                tracing::info!("Cached source session rejected by provider");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn login(&self) -> Result<Arc<Session>, SourceError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            SourceError::AuthenticationFailed("no source credentials configured".to_string())
        })?;

        let session = self.provider.login(credentials).await?;
        self.logins.fetch_add(1, Ordering::Relaxed);
        tracing::info!(username = %credentials.username, "Logged in to metric source");

        if let Err(e) = self.store.save(&session).await {
            tracing::warn!(error = %e, "Failed to persist source session");
        }

        Ok(Arc::new(session))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("Session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session store decode error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProfileKey;
    use crate::source::RawCount;
    use std::sync::atomic::AtomicBool;

    struct StubProvider {
        accept_cached: AtomicBool,
        fail_login: AtomicBool,
        logins: AtomicU64,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                accept_cached: AtomicBool::new(true),
                fail_login: AtomicBool::new(false),
                logins: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricProvider for StubProvider {
        async fn login(&self, _credentials: &SourceCredentials) -> Result<Session, SourceError> {
            if self.fail_login.load(Ordering::SeqCst) {
                return Err(SourceError::AuthenticationFailed("bad password".into()));
            }
            let n = self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new(format!("token-{}", n), "test-agent"))
        }

        async fn validate(&self, _session: &Session) -> Result<bool, SourceError> {
            Ok(self.accept_cached.load(Ordering::SeqCst))
        }

        async fn follower_count(
            &self,
            _session: &Session,
            _profile: &ProfileKey,
        ) -> Result<RawCount, SourceError> {
            Ok(RawCount::exact(1))
        }
    }

    fn credentials() -> Option<SourceCredentials> {
        Some(SourceCredentials {
            username: "watcher".into(),
            password: "secret".into(),
        })
    }

    #[tokio::test]
    async fn test_uses_valid_cached_session() {
        let provider = Arc::new(StubProvider::new());
        let store = Arc::new(MemorySessionStore::with_session(Session::new("cached", "ua")));
        let manager = SessionManager::new(
            provider.clone(),
            store,
            credentials(),
            Duration::from_secs(3600),
        );

        let session = manager.ensure_session().await.unwrap();
        assert_eq!(session.token, "cached");
        assert_eq!(manager.login_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_cached_session_triggers_login() {
        let provider = Arc::new(StubProvider::new());
        provider.accept_cached.store(false, Ordering::SeqCst);
        let store = Arc::new(MemorySessionStore::with_session(Session::new("stale", "ua")));
        let manager = SessionManager::new(
            provider.clone(),
            store.clone(),
            credentials(),
            Duration::from_secs(3600),
        );

        let session = manager.ensure_session().await.unwrap();
        assert_eq!(session.token, "token-0");
        assert_eq!(store.current().unwrap().token, "token-0");

        // Live session is reused
        let again = manager.ensure_session().await.unwrap();
        assert_eq!(again.token, "token-0");
        assert_eq!(manager.login_count(), 1);
    }

    #[tokio::test]
    async fn test_proactive_refresh_after_max_age() {
        let provider = Arc::new(StubProvider::new());
        let manager = SessionManager::new(
            provider.clone(),
            Arc::new(MemorySessionStore::new()),
            credentials(),
            Duration::ZERO,
        );

        let first = manager.ensure_session().await.unwrap();
        let second = manager.ensure_session().await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(manager.login_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate() {
        let provider = Arc::new(StubProvider::new());
        let manager = SessionManager::new(
            provider.clone(),
            Arc::new(MemorySessionStore::new()),
            credentials(),
            Duration::from_secs(3600),
        );

        let first = manager.ensure_session().await.unwrap();
        manager.invalidate(&first).await;
        let refreshed = manager.refresh().await.unwrap();
        assert_ne!(first.token, refreshed.token);
        assert_eq!(manager.login_count(), 2);

        // Rejecting a session that is no longer live keeps the current one
        manager.invalidate(&first).await;
        assert_eq!(manager.ensure_session().await.unwrap().token, refreshed.token);
        assert_eq!(manager.login_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_session_is_not_reloaded_from_cache() {
        let provider = Arc::new(StubProvider::new());
        let store = Arc::new(MemorySessionStore::with_session(Session::new("cached", "ua")));
        let manager = SessionManager::new(
            provider.clone(),
            store,
            credentials(),
            Duration::from_secs(3600),
        );

        let cached = manager.ensure_session().await.unwrap();
        assert_eq!(cached.token, "cached");
        manager.invalidate(&cached).await;

        let refreshed = manager.refresh().await.unwrap();
        assert_eq!(refreshed.token, "token-0");
        assert_eq!(manager.login_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_log_in_once() {
        let provider = Arc::new(StubProvider::new());
        let manager = Arc::new(SessionManager::new(
            provider.clone(),
            Arc::new(MemorySessionStore::new()),
            credentials(),
            Duration::from_secs(3600),
        ));

        let rejected = manager.ensure_session().await.unwrap();
        let worker = |manager: Arc<SessionManager>, rejected: Arc<Session>| async move {
            manager.invalidate(&rejected).await;
            manager.refresh().await.unwrap()
        };
        let (a, b) = tokio::join!(
            worker(manager.clone(), rejected.clone()),
            worker(manager.clone(), rejected.clone())
        );

        assert_eq!(a.token, b.token);
        assert_ne!(a.token, rejected.token);
        // Initial login plus a single refresh
        assert_eq!(manager.login_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_auth_failure() {
        let manager = SessionManager::new(
            Arc::new(StubProvider::new()),
            Arc::new(MemorySessionStore::new()),
            None,
            Duration::from_secs(3600),
        );

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, SourceError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_failed_login_surfaces_error() {
        let provider = Arc::new(StubProvider::new());
        provider.fail_login.store(true, Ordering::SeqCst);
        let manager = SessionManager::new(
            provider,
            Arc::new(MemorySessionStore::new()),
            credentials(),
            Duration::from_secs(3600),
        );

        tokio_test::assert_err!(manager.ensure_session().await);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested").join("session.json"));

        assert!(store.load().await.unwrap().is_none());

        let session = Session::new("abc", "ua");
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = FileSessionStore::new(path);
        assert!(matches!(store.load().await, Err(SessionStoreError::Serde(_))));
    }
}

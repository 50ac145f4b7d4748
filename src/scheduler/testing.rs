//! Scripted collaborators for pipeline tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::executor::{ExecutorSettings, TaskExecutor};
use crate::alerts::{
    Alert, AlertEngine, AlertId, AlertStore, AttemptLog, Messenger, NotificationDispatcher,
    NotifierError, UserChannel,
};
use crate::config::{RetryPolicy, SourceCredentials};
use crate::history::HistoryStore;
use crate::lock::{MemoryLockStore, ProfileLock};
use crate::model::{MonitoredProfile, ProfileKey, UserId};
use crate::profiles::{MemoryDirectory, ProfileStore};
use crate::source::{
    MemorySessionStore, MetricProvider, MetricSource, Pacer, RawCount, Session, SessionManager,
    SourceError,
};

/// One scripted provider response
pub(crate) enum Step {
    Count(u64),
    Fail(SourceError),
    /// Respond after a delay
    Slow(Duration, u64),
    Panic,
}

#[derive(Default)]
pub(crate) struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    logins: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    /// Number of follower-count requests served
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricProvider for ScriptedProvider {
    async fn login(&self, _credentials: &SourceCredentials) -> Result<Session, SourceError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(format!("token-{}", n), "test-agent"))
    }

    async fn validate(&self, _session: &Session) -> Result<bool, SourceError> {
        Ok(true)
    }

    async fn follower_count(
        &self,
        _session: &Session,
        _profile: &ProfileKey,
    ) -> Result<RawCount, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Count(value)) => Ok(RawCount::exact(value)),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Slow(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(RawCount::exact(value))
            }
            Some(Step::Panic) => panic!("scripted provider panic"),
            None => Err(SourceError::TransientNetwork("script exhausted".to_string())),
        }
    }
}

/// Records messages; optionally fails or hangs on every delivery
#[derive(Default)]
pub(crate) struct FakeMessenger {
    sent: Mutex<Vec<String>>,
    failure: Mutex<Option<fn() -> NotifierError>>,
    stall: Mutex<Option<Duration>>,
}

impl FakeMessenger {
    pub(crate) fn fail_with(&self, failure: fn() -> NotifierError) {
        *self.failure.lock() = Some(failure);
    }

    pub(crate) fn stall_for(&self, delay: Duration) {
        *self.stall.lock() = Some(delay);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn deliver(&self, _channel: &UserChannel, message: &str) -> Result<(), NotifierError> {
        self.sent.lock().push(message.to_string());
        let stall = *self.stall.lock();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        match *self.failure.lock() {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

/// Fully wired executor over in-memory stores with one registered profile
pub(crate) struct Harness {
    pub key: ProfileKey,
    pub provider: Arc<ScriptedProvider>,
    pub messenger: Arc<FakeMessenger>,
    pub sessions: Arc<SessionManager>,
    pub history: Arc<HistoryStore>,
    pub profiles: Arc<ProfileStore>,
    pub alerts: Arc<AlertStore>,
    pub attempts: Arc<AttemptLog>,
    pub directory: Arc<MemoryDirectory>,
    pub lock: ProfileLock,
    pub executor: Arc<TaskExecutor>,
}

impl Harness {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self::with_limits(steps, Duration::from_secs(5), Duration::from_secs(10))
    }

    pub(crate) fn with_limits(
        steps: Vec<Step>,
        soft_time_limit: Duration,
        dispatch_deadline: Duration,
    ) -> Self {
        let key = ProfileKey::parse("watched").unwrap_or_else(|e| panic!("{}", e));
        let provider = Arc::new(ScriptedProvider::new(steps));
        let messenger = Arc::new(FakeMessenger::default());

        let sessions = Arc::new(SessionManager::new(
            provider.clone(),
            Arc::new(MemorySessionStore::new()),
            Some(SourceCredentials {
                username: "watcher".into(),
                password: "pw".into(),
            }),
            Duration::from_secs(3600),
        ));
        let source = Arc::new(MetricSource::new(provider.clone(), sessions.clone(), Pacer::disabled()));

        let history = Arc::new(HistoryStore::new());
        let profiles = Arc::new(ProfileStore::new());
        profiles.register(MonitoredProfile::new(key.clone(), UserId(1)));

        let directory = Arc::new(MemoryDirectory::new());
        directory.set_owner(key.clone(), UserId(1));
        directory.set_channel(UserId(1), UserChannel::Log);

        let alerts = Arc::new(AlertStore::new());
        let attempts = Arc::new(AttemptLog::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            messenger.clone(),
            attempts.clone(),
            RetryPolicy::new(2, Duration::from_millis(1), 2.0, Duration::from_millis(2)),
        ));
        let lock = ProfileLock::new(Arc::new(MemoryLockStore::new()));

        let executor = Arc::new(TaskExecutor::new(
            source,
            history.clone(),
            profiles.clone(),
            Arc::new(AlertEngine::new(alerts.clone())),
            dispatcher,
            directory.clone(),
            lock.clone(),
            ExecutorSettings {
                fetch_retry: RetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(4)),
                lock_ttl: Duration::from_secs(60),
                soft_time_limit,
                dispatch_deadline,
            },
        ));

        Self {
            key,
            provider,
            messenger,
            sessions,
            history,
            profiles,
            alerts,
            attempts,
            directory,
            lock,
            executor,
        }
    }

    pub(crate) fn add_alert(&self, threshold: u64) -> AlertId {
        self.alerts
            .create(Alert::new(self.key.clone(), UserId(1), threshold))
            .map(|a| a.id)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    /// Register another profile owned by the same user
    pub(crate) fn add_profile(&self, name: &str) -> ProfileKey {
        let key = ProfileKey::parse(name).unwrap_or_else(|e| panic!("{}", e));
        self.profiles.register(MonitoredProfile::new(key.clone(), UserId(1)));
        self.directory.set_owner(key.clone(), UserId(1));
        key
    }

    pub(crate) async fn lock_is_free(&self) -> bool {
        match self.lock.try_acquire(&self.key, Duration::from_secs(1)).await {
            Ok(token) => {
                let _ = self.lock.release(&self.key, &token).await;
                true
            }
            Err(_) => false,
        }
    }
}

//! Monitoring service
//!
//! Wires the source adapter, stores, alert engine, dispatcher, lock,
//! scheduler and worker pool together and exposes the hooks collaborators
//! use: profile registration, alert creation and read-only reporting.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::{
    Alert, AlertEngine, AlertId, AlertStore, AlertStoreError, AttemptLog, Messenger,
    NotificationDispatcher, Notifier, NotifierError,
};
use crate::config::{ConfigError, MonitorConfig};
use crate::history::{GrowthSummary, HistoryStats, HistoryStore, PeriodChange};
use crate::lock::{LockJanitor, LockStore, MemoryLockStore, ProfileLock};
use crate::model::{InvalidProfileKey, MetricSnapshot, MonitoredProfile, NotificationAttempt, ProfileKey};
use crate::profiles::{CachedDirectory, Directory, DirectoryError, ProfileStore};
use crate::scheduler::{
    job_queue, ExecutorSettings, JobReceiver, PipelineStats, QueueError, Scheduler, StatsSnapshot,
    TaskExecutor, WorkerPool,
};
use crate::source::{
    FileSessionStore, HttpMetricProvider, MetricProvider, MetricSource, Pacer, SessionManager,
    SessionStore, SourceError,
};

/// External collaborators the pipeline runs against
pub struct Collaborators {
    pub provider: Arc<dyn MetricProvider>,
    pub session_store: Arc<dyn SessionStore>,
    pub messenger: Arc<dyn Messenger>,
    pub lock_store: Arc<dyn LockStore>,
    pub directory: Arc<dyn Directory>,
}

impl Collaborators {
    /// Production collaborators: HTTP provider, file session cache,
    /// Telegram/webhook notifier and an in-process lock store. Directory
    /// lookups are cached.
    pub fn from_config(config: &MonitorConfig, directory: Arc<dyn Directory>) -> Result<Self, ServiceError> {
        Ok(Self {
            provider: Arc::new(HttpMetricProvider::new(config.source_base_url.clone())?),
            session_store: Arc::new(FileSessionStore::new(config.session_path.clone())),
            messenger: Arc::new(Notifier::new(
                config.telegram_bot_token.clone(),
                config.telegram_api_base.clone(),
                config.notify_timeout,
            )?),
            lock_store: Arc::new(MemoryLockStore::new()),
            directory: Arc::new(CachedDirectory::new(directory, config.directory_cache_ttl)),
        })
    }
}

/// Monitoring state of one profile
#[derive(Debug, Clone, Serialize)]
pub struct ProfileStatus {
    pub profile: MonitoredProfile,
    pub latest: Option<MetricSnapshot>,
    /// Thresholds still waiting to fire
    pub pending_thresholds: Vec<u64>,
    pub triggered_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertReport {
    pub alert: Alert,
    pub attempts: Vec<NotificationAttempt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthReport {
    pub profile: ProfileKey,
    pub days: u32,
    pub summary: Option<GrowthSummary>,
    pub last_24h: Option<PeriodChange>,
    pub last_7d: Option<PeriodChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub profiles: usize,
    pub active_profiles: usize,
    pub alerts: usize,
    pub history: HistoryStats,
    pub pipeline: StatsSnapshot,
    pub queue_remaining: usize,
    /// Only present when directory lookups go through a cache
    pub directory_hit_rate: Option<f64>,
}

pub struct MonitorService {
    config: MonitorConfig,
    source: Arc<MetricSource>,
    history: Arc<HistoryStore>,
    profiles: Arc<ProfileStore>,
    alerts: Arc<AlertStore>,
    attempts: Arc<AttemptLog>,
    directory: Arc<dyn Directory>,
    scheduler: Arc<Scheduler>,
    executor: Arc<TaskExecutor>,
    lock_store: Arc<dyn LockStore>,
    receiver: Mutex<Option<JobReceiver>>,
    stats: Arc<PipelineStats>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorService {
    pub fn new(config: MonitorConfig, collaborators: Collaborators) -> Result<Self, ServiceError> {
        config.validate()?;

        let Collaborators {
            provider,
            session_store,
            messenger,
            lock_store,
            directory,
        } = collaborators;

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&provider),
            session_store,
            config.credentials.clone(),
            config.session_max_age,
        ));
        let source = Arc::new(MetricSource::new(
            provider,
            sessions,
            Pacer::new(config.delay_min, config.delay_max),
        ));

        let history = Arc::new(HistoryStore::new());
        let profiles = Arc::new(ProfileStore::new());
        let alerts = Arc::new(AlertStore::new());
        let attempts = Arc::new(AttemptLog::new());
        let dispatcher = Arc::new(
            NotificationDispatcher::new(messenger, Arc::clone(&attempts), config.dispatch_retry.clone())
                .with_send_timeout(config.notify_timeout),
        );

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&source),
            Arc::clone(&history),
            Arc::clone(&profiles),
            Arc::new(AlertEngine::new(Arc::clone(&alerts))),
            dispatcher,
            Arc::clone(&directory),
            ProfileLock::new(Arc::clone(&lock_store)),
            ExecutorSettings::from(&config),
        ));

        let (sender, receiver) = job_queue(config.queue_capacity);
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&profiles),
            sender,
            config.interval,
            config.tick_interval,
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            source,
            history,
            profiles,
            alerts,
            attempts,
            directory,
            scheduler,
            executor,
            lock_store,
            receiver: Mutex::new(Some(receiver)),
            stats: Arc::new(PipelineStats::new()),
            shutdown,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Start the scheduler and workers
    pub fn start(&self) -> Result<(), ServiceError> {
        let receiver = self.receiver.lock().take().ok_or(ServiceError::AlreadyStarted)?;

        let pool = WorkerPool::new(
            Arc::clone(&self.executor),
            receiver,
            self.config.workers,
            self.config.hard_time_limit,
            Arc::clone(&self.stats),
        );

        let mut handles = self.handles.lock();
        handles.extend(pool.start(self.shutdown.subscribe()));
        handles.push(Arc::clone(&self.scheduler).start(self.shutdown.subscribe()));
        handles.push(
            LockJanitor::new(Arc::clone(&self.lock_store), self.config.lock_ttl)
                .start(self.shutdown.subscribe()),
        );

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            workers = self.config.workers,
            "Monitoring started"
        );
        Ok(())
    }

    /// Stop scheduling and wait for running checks to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Monitoring task ended abnormally");
            }
        }
        tracing::info!("Monitoring stopped");
    }

    /// Start monitoring a profile, or resume a soft-disabled one with its history
    pub async fn register_profile(
        &self,
        username: &str,
        display_name: Option<String>,
    ) -> Result<MonitoredProfile, ServiceError> {
        let key = ProfileKey::parse(username)?;
        let owner = self
            .directory
            .owner_of(&key)
            .await?
            .ok_or_else(|| ServiceError::UnknownOwner(key.to_string()))?;

        let mut profile = MonitoredProfile::new(key, owner);
        profile.display_name = display_name;
        let profile = self.profiles.register(profile);
        tracing::info!(profile = %profile.key, owner = %profile.owner, "Profile registered");
        Ok(profile)
    }

    /// Stop scheduling a profile; history and alerts are kept
    pub fn unregister_profile(&self, username: &str) -> Result<(), ServiceError> {
        let key = ProfileKey::parse(username)?;
        if !self.profiles.disable(&key, None) {
            return Err(ServiceError::ProfileNotFound(key.to_string()));
        }
        tracing::info!(profile = %key, "Profile unregistered");
        Ok(())
    }

    /// Add a milestone alert for the profile's owner
    pub fn add_alert(
        &self,
        username: &str,
        threshold: u64,
        template: Option<String>,
    ) -> Result<Alert, ServiceError> {
        let profile = self.profile(username)?;
        let mut alert = Alert::new(profile.key, profile.owner, threshold);
        if let Some(template) = template {
            alert = alert.with_template(template);
        }
        Ok(self.alerts.create(alert)?)
    }

    /// Pause or resume an alert; a paused alert never fires
    pub fn set_alert_enabled(&self, id: AlertId, enabled: bool) -> Result<Alert, ServiceError> {
        if !self.alerts.set_enabled(id, enabled) {
            return Err(ServiceError::AlertNotFound(id.0));
        }
        tracing::info!(alert_id = %id, enabled, "Alert updated");
        self.alerts.get(id).ok_or(ServiceError::AlertNotFound(id.0))
    }

    /// Every registered profile, monitored or not
    pub fn profiles(&self) -> Vec<MonitoredProfile> {
        self.profiles.list()
    }

    pub fn profile_status(&self, username: &str) -> Result<ProfileStatus, ServiceError> {
        let profile = self.profile(username)?;
        let alerts = self.alerts.for_profile(&profile.key);

        Ok(ProfileStatus {
            latest: self.history.latest(&profile.key),
            pending_thresholds: alerts
                .iter()
                .filter(|a| a.enabled && a.is_pending())
                .map(|a| a.threshold)
                .collect(),
            triggered_alerts: alerts.iter().filter(|a| !a.is_pending()).count(),
            profile,
        })
    }

    /// Snapshots in `[from, to]`, oldest first
    pub fn history(
        &self,
        username: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, ServiceError> {
        let profile = self.profile(username)?;
        Ok(self.history.range(&profile.key, from, to).collect())
    }

    pub fn alerts(&self, username: &str) -> Result<Vec<AlertReport>, ServiceError> {
        let profile = self.profile(username)?;
        Ok(self
            .alerts
            .for_profile(&profile.key)
            .into_iter()
            .map(|alert| AlertReport {
                attempts: self.attempts.for_alert(alert.id),
                alert,
            })
            .collect())
    }

    pub fn growth(&self, username: &str, days: u32) -> Result<GrowthReport, ServiceError> {
        let profile = self.profile(username)?;
        let now = Utc::now();
        let from = now - ChronoDuration::days(i64::from(days.max(1)));

        Ok(GrowthReport {
            summary: GrowthSummary::from_snapshots(self.history.range(&profile.key, from, now)),
            last_24h: PeriodChange::compute(&self.history, &profile.key, now, ChronoDuration::hours(24)),
            last_7d: PeriodChange::compute(&self.history, &profile.key, now, ChronoDuration::days(7)),
            profile: profile.key,
            days,
        })
    }

    /// Queue an immediate check of a monitored profile
    pub fn check_now(&self, username: &str) -> Result<(), ServiceError> {
        let profile = self.profile(username)?;
        if !profile.enabled {
            return Err(ServiceError::ProfileDisabled(profile.key.to_string()));
        }
        self.scheduler.enqueue_now(profile.key)?;
        Ok(())
    }

    /// Verify the metric source accepts our session
    pub async fn check_source(&self) -> Result<(), ServiceError> {
        self.source.check_connection().await?;
        Ok(())
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            profiles: self.profiles.len(),
            active_profiles: self.profiles.active_count(),
            alerts: self.alerts.len(),
            history: self.history.stats(),
            pipeline: self.stats.snapshot(),
            queue_remaining: self.scheduler.queue_remaining(),
            directory_hit_rate: self.directory.cache_hit_rate(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn profile(&self, username: &str) -> Result<MonitoredProfile, ServiceError> {
        let key = ProfileKey::parse(username)?;
        self.profiles
            .get(&key)
            .ok_or_else(|| ServiceError::ProfileNotFound(key.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidProfile(#[from] InvalidProfileKey),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile monitoring is disabled: {0}")]
    ProfileDisabled(String),

    #[error("No owner known for profile {0}")]
    UnknownOwner(String),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertStoreError),

    #[error("Alert not found: {0}")]
    AlertNotFound(u64),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Metric source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Monitoring already started")]
    AlreadyStarted,
}

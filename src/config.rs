//! Pipeline configuration
//!
//! Environment variables (all optional, a `.env` file is honoured by the binary):
//! - MONITORING_INTERVAL_MINUTES: Minimum time between checks of one profile (default: 15)
//! - MONITORING_TICK_SECS: How often the scheduler looks for due profiles (default: 60)
//! - MONITORING_DELAY_MIN_SECS / MONITORING_DELAY_MAX_SECS: Randomized pre-call delay (default: 1 / 3)
//! - FETCH_MAX_ATTEMPTS / FETCH_BACKOFF_BASE_SECS / FETCH_BACKOFF_MULTIPLIER / FETCH_BACKOFF_MAX_SECS
//! - NOTIFY_MAX_ATTEMPTS / NOTIFY_BACKOFF_BASE_SECS / NOTIFY_BACKOFF_MULTIPLIER / NOTIFY_BACKOFF_MAX_SECS
//! - NOTIFY_TIMEOUT_SECS: Per-request timeout for notification delivery (default: 10)
//! - SESSION_MAX_AGE_HOURS: Proactive session refresh age (default: 24)
//! - INSTAGRAM_USERNAME / INSTAGRAM_PASSWORD: Source credentials
//! - INSTAGRAM_SESSION_PATH: Cached session file (default: data/instagram_session.json)
//! - INSTAGRAM_BASE_URL: Source API base (default: https://i.instagram.com)
//! - TELEGRAM_BOT_TOKEN / TELEGRAM_API_BASE
//! - TASK_SOFT_LIMIT_SECS / TASK_HARD_LIMIT_SECS: Per-check time limits (default: 1500 / 1800)
//! - LOCK_TTL_SECS: Profile lock expiry (default: hard limit + 300)
//! - MONITORING_WORKERS: Worker tasks (default: number of CPUs)
//! - QUEUE_CAPACITY: Pending job capacity (default: 1024)
//! - DIRECTORY_CACHE_SECS: Owner/channel lookup cache TTL (default: 300)
//! - SOCIALPULSE_HOST / SOCIALPULSE_PORT: Reporting API bind address (default: 0.0.0.0:8000)
//! - SOCIALPULSE_SEED_FILE: Users, profiles and alerts to load at startup

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Exponential backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Policy for transient metric source failures (2s, 4s, ... capped at 60s)
    pub fn fetch_default() -> Self {
        Self::new(3, Duration::from_secs(2), 2.0, Duration::from_secs(60))
    }

    /// Policy for notification delivery (1s, 2s, ... capped at 10s)
    pub fn dispatch_default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0, Duration::from_secs(10))
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: name,
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: name,
                reason: format!("multiplier {} must be >= 1.0", self.multiplier),
            });
        }
        Ok(())
    }
}

/// Login credentials for the metric source
#[derive(Clone, PartialEq)]
pub struct SourceCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Minimum time between two checks of the same profile
    pub interval: Duration,
    /// Scheduler wake-up period
    pub tick_interval: Duration,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub fetch_retry: RetryPolicy,
    pub dispatch_retry: RetryPolicy,
    /// Upper bound on one notification request
    pub notify_timeout: Duration,
    /// Sessions older than this are refreshed before use
    pub session_max_age: Duration,
    pub session_path: PathBuf,
    pub credentials: Option<SourceCredentials>,
    pub source_base_url: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,
    pub lock_ttl: Duration,
    /// Fetch-phase budget; expiry aborts gracefully
    pub soft_time_limit: Duration,
    /// Whole-task budget; expiry kills the task
    pub hard_time_limit: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
    pub directory_cache_ttl: Duration,
    pub host: String,
    pub port: u16,
    pub seed_file: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let hard_time_limit = Duration::from_secs(30 * 60);
        Self {
            interval: Duration::from_secs(15 * 60),
            tick_interval: Duration::from_secs(60),
            delay_min: Duration::from_secs(1),
            delay_max: Duration::from_secs(3),
            fetch_retry: RetryPolicy::fetch_default(),
            dispatch_retry: RetryPolicy::dispatch_default(),
            notify_timeout: Duration::from_secs(10),
            session_max_age: Duration::from_secs(24 * 3600),
            session_path: PathBuf::from("data/instagram_session.json"),
            credentials: None,
            source_base_url: "https://i.instagram.com".to_string(),
            telegram_bot_token: None,
            telegram_api_base: "https://api.telegram.org".to_string(),
            lock_ttl: hard_time_limit + Duration::from_secs(300),
            soft_time_limit: Duration::from_secs(25 * 60),
            hard_time_limit,
            workers: num_cpus::get().max(1),
            queue_capacity: 1024,
            directory_cache_ttl: Duration::from_secs(300),
            host: "0.0.0.0".to_string(),
            port: 8000,
            seed_file: None,
        }
    }
}

impl MonitorConfig {
    /// Build a configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let hard_time_limit = env_secs("TASK_HARD_LIMIT_SECS").unwrap_or(defaults.hard_time_limit);
        let credentials = match (
            std::env::var("INSTAGRAM_USERNAME").ok(),
            std::env::var("INSTAGRAM_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Some(SourceCredentials { username, password })
            }
            _ => None,
        };

        Self {
            interval: env_parse::<u64>("MONITORING_INTERVAL_MINUTES")
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.interval),
            tick_interval: env_secs("MONITORING_TICK_SECS").unwrap_or(defaults.tick_interval),
            delay_min: env_secs("MONITORING_DELAY_MIN_SECS").unwrap_or(defaults.delay_min),
            delay_max: env_secs("MONITORING_DELAY_MAX_SECS").unwrap_or(defaults.delay_max),
            fetch_retry: retry_from_env("FETCH", defaults.fetch_retry),
            dispatch_retry: retry_from_env("NOTIFY", defaults.dispatch_retry),
            notify_timeout: env_secs("NOTIFY_TIMEOUT_SECS").unwrap_or(defaults.notify_timeout),
            session_max_age: env_parse::<u64>("SESSION_MAX_AGE_HOURS")
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.session_max_age),
            session_path: std::env::var("INSTAGRAM_SESSION_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_path),
            credentials,
            source_base_url: std::env::var("INSTAGRAM_BASE_URL")
                .unwrap_or(defaults.source_base_url),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            telegram_api_base: std::env::var("TELEGRAM_API_BASE")
                .unwrap_or(defaults.telegram_api_base),
            lock_ttl: env_secs("LOCK_TTL_SECS")
                .unwrap_or(hard_time_limit + Duration::from_secs(300)),
            soft_time_limit: env_secs("TASK_SOFT_LIMIT_SECS").unwrap_or(defaults.soft_time_limit),
            hard_time_limit,
            workers: env_parse("MONITORING_WORKERS").unwrap_or(defaults.workers),
            queue_capacity: env_parse("QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            directory_cache_ttl: env_secs("DIRECTORY_CACHE_SECS")
                .unwrap_or(defaults.directory_cache_ttl),
            host: std::env::var("SOCIALPULSE_HOST").unwrap_or(defaults.host),
            port: env_parse("SOCIALPULSE_PORT").unwrap_or(defaults.port),
            seed_file: std::env::var("SOCIALPULSE_SEED_FILE").ok().map(PathBuf::from),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_delay_range(mut self, min: Duration, max: Duration) -> Self {
        self.delay_min = min;
        self.delay_max = max;
        self
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_dispatch_retry(mut self, policy: RetryPolicy) -> Self {
        self.dispatch_retry = policy;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Offset from check start after which undelivered notifications are
    /// given up, halfway between the soft and hard limits
    pub fn dispatch_deadline(&self) -> Duration {
        let slack = self.hard_time_limit.saturating_sub(self.soft_time_limit);
        self.soft_time_limit + slack / 2
    }

    /// Set soft and hard task limits; the lock TTL is moved past the hard limit if needed
    pub fn with_time_limits(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_time_limit = soft;
        self.hard_time_limit = hard;
        if self.lock_ttl <= hard {
            self.lock_ttl = hard + hard / 10 + Duration::from_millis(1);
        }
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(SourceCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "tick_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.delay_min > self.delay_max {
            return Err(ConfigError::Invalid {
                field: "delay_min",
                reason: format!(
                    "{:?} exceeds delay_max {:?}",
                    self.delay_min, self.delay_max
                ),
            });
        }
        if self.soft_time_limit > self.hard_time_limit {
            return Err(ConfigError::Invalid {
                field: "soft_time_limit",
                reason: format!(
                    "{:?} exceeds hard_time_limit {:?}",
                    self.soft_time_limit, self.hard_time_limit
                ),
            });
        }
        // An orphaned lock has to outlive any task that could still hold it
        if self.lock_ttl <= self.hard_time_limit {
            return Err(ConfigError::Invalid {
                field: "lock_ttl",
                reason: format!(
                    "{:?} must exceed hard_time_limit {:?}",
                    self.lock_ttl, self.hard_time_limit
                ),
            });
        }
        if self.notify_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "notify_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.fetch_retry.validate("fetch_retry")?;
        self.dispatch_retry.validate("dispatch_retry")?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<f64>(name)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn retry_from_env(prefix: &str, defaults: RetryPolicy) -> RetryPolicy {
    RetryPolicy {
        max_attempts: env_parse(&format!("{prefix}_MAX_ATTEMPTS")).unwrap_or(defaults.max_attempts),
        base_delay: env_secs(&format!("{prefix}_BACKOFF_BASE_SECS")).unwrap_or(defaults.base_delay),
        multiplier: env_parse(&format!("{prefix}_BACKOFF_MULTIPLIER"))
            .unwrap_or(defaults.multiplier),
        max_delay: env_secs(&format!("{prefix}_BACKOFF_MAX_SECS")).unwrap_or(defaults.max_delay),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

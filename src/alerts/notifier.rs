//! Notification delivery for fired alerts

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::attempts::AttemptLog;
use super::config::{Alert, UserChannel};
use crate::config::RetryPolicy;
use crate::model::DeliveryOutcome;

/// Sends one message over one channel, without retries
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, channel: &UserChannel, message: &str) -> Result<(), NotifierError>;
}

/// Notifier for Telegram, webhooks and the log
pub struct Notifier {
    client: reqwest::Client,
    telegram_token: Option<String>,
    telegram_api_base: String,
}

impl Notifier {
    /// Create a new notifier whose HTTP requests give up after `timeout`
    pub fn new(
        telegram_token: Option<String>,
        telegram_api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Client(e.to_string()))?;

        Ok(Self {
            client,
            telegram_token,
            telegram_api_base: telegram_api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Send a Telegram message in HTML parse mode
    async fn send_telegram(&self, chat_id: &str, message: &str) -> Result<(), NotifierError> {
        let token = self
            .telegram_token
            .as_deref()
            .ok_or(NotifierError::NotConfigured("telegram bot token"))?;

        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.telegram_api_base, token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Unavailable(format!("Failed to reach Telegram: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(chat_id = %chat_id, "Telegram message sent");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_response("Telegram", status, &body))
    }

    /// Send webhook notification
    async fn send_webhook(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        message: &str,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Unavailable(format!("Failed to send webhook: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_response("Webhook", status, ""));
        }

        tracing::debug!(url = %url, "Webhook notification sent");
        Ok(())
    }
}

#[async_trait]
impl Messenger for Notifier {
    async fn deliver(&self, channel: &UserChannel, message: &str) -> Result<(), NotifierError> {
        match channel {
            UserChannel::Log => {
                tracing::warn!("Alert notification: {}", message);
                Ok(())
            }
            UserChannel::Telegram { chat_id } => self.send_telegram(chat_id, message).await,
            UserChannel::Webhook { url, headers } => self.send_webhook(url, headers, message).await,
        }
    }
}

/// Client errors other than throttling will not succeed on retry
fn classify_response(target: &str, status: StatusCode, body: &str) -> NotifierError {
    let detail = if body.is_empty() {
        format!("{} returned status {}", target, status)
    } else {
        format!("{} returned status {}: {}", target, status, body)
    };

    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        NotifierError::Rejected(detail)
    } else {
        NotifierError::Unavailable(detail)
    }
}

/// Result of a successful `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent { attempts: u32 },
    /// The audit log already holds a delivered attempt for this alert
    AlreadyDelivered,
}

/// Delivers fired alerts with its own bounded retry, recording every attempt
pub struct NotificationDispatcher {
    messenger: Arc<dyn Messenger>,
    attempts: Arc<AttemptLog>,
    policy: RetryPolicy,
    send_timeout: Duration,
}

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

impl NotificationDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, attempts: Arc<AttemptLog>, policy: RetryPolicy) -> Self {
        Self {
            messenger,
            attempts,
            policy,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Bound a single delivery attempt; an attempt that runs longer counts
    /// as a retryable failure
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Deliver `message` for a triggered alert.
    ///
    /// The alert's state is never touched; a failure here is only recorded
    /// and logged.
    pub async fn send(
        &self,
        alert: &Alert,
        channel: Option<&UserChannel>,
        message: &str,
    ) -> Result<Delivery, DispatchError> {
        if self.attempts.has_delivered(alert.id) {
            tracing::debug!(alert_id = %alert.id, "Notification already delivered, skipping");
            return Ok(Delivery::AlreadyDelivered);
        }

        let Some(channel) = channel else {
            self.attempts.record(
                alert.id,
                1,
                DeliveryOutcome::Exhausted,
                Some("no channel configured for user".to_string()),
            );
            tracing::error!(
                alert_id = %alert.id,
                user = %alert.user,
                "No notification channel for user"
            );
            return Err(DispatchError::NoChannel(alert.user.0));
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(self.send_timeout, self.messenger.deliver(channel, message))
                .await
                .unwrap_or_else(|_| {
                    Err(NotifierError::Unavailable(format!(
                        "delivery timed out after {:?}",
                        self.send_timeout
                    )))
                });
            match result {
                Ok(()) => {
                    self.attempts
                        .record(alert.id, attempt, DeliveryOutcome::Delivered, None);
                    tracing::info!(
                        alert_id = %alert.id,
                        channel = channel.kind(),
                        attempts = attempt,
                        "Notification delivered"
                    );
                    return Ok(Delivery::Sent { attempts: attempt });
                }
                Err(e) if e.is_permanent() => {
                    self.attempts.record(
                        alert.id,
                        attempt,
                        DeliveryOutcome::Exhausted,
                        Some(e.to_string()),
                    );
                    tracing::error!(
                        alert_id = %alert.id,
                        channel = channel.kind(),
                        error = %e,
                        "Notification rejected"
                    );
                    return Err(DispatchError::Rejected(e.to_string()));
                }
                Err(e) => {
                    self.attempts.record(
                        alert.id,
                        attempt,
                        DeliveryOutcome::Failed,
                        Some(e.to_string()),
                    );

                    if attempt >= max_attempts {
                        self.attempts.record(
                            alert.id,
                            attempt,
                            DeliveryOutcome::Exhausted,
                            Some(e.to_string()),
                        );
                        tracing::error!(
                            alert_id = %alert.id,
                            channel = channel.kind(),
                            attempts = attempt,
                            error = %e,
                            "Notification failed after retries"
                        );
                        return Err(DispatchError::Exhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }

                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        alert_id = %alert.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Close out an alert whose delivery was cut short by the caller.
    ///
    /// Records an `Exhausted` attempt unless the alert was already delivered.
    /// Returns whether anything was recorded.
    pub fn abandon(&self, alert: &Alert, reason: &str) -> bool {
        if self.attempts.has_delivered(alert.id) {
            return false;
        }
        let attempt = self
            .attempts
            .for_alert(alert.id)
            .last()
            .map(|a| a.attempt)
            .unwrap_or(1);
        self.attempts.record(
            alert.id,
            attempt,
            DeliveryOutcome::Exhausted,
            Some(reason.to_string()),
        );
        tracing::error!(alert_id = %alert.id, reason, "Notification abandoned");
        true
    }

    pub fn attempts(&self) -> &Arc<AttemptLog> {
        &self.attempts
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Channel not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl NotifierError {
    /// Retrying cannot succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NotifierError::NotConfigured(_) | NotifierError::Rejected(_) | NotifierError::Client(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("No notification channel for user {0}")]
    NoChannel(i64),

    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::config::AlertId;
    use crate::model::{ProfileKey, UserId};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedMessenger {
        results: Mutex<VecDeque<Result<(), NotifierError>>>,
        sent: Mutex<Vec<String>>,
        /// Delivery of the first message hangs this long
        stall: Mutex<Option<Duration>>,
    }

    impl ScriptedMessenger {
        fn new(results: Vec<Result<(), NotifierError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                sent: Mutex::new(Vec::new()),
                stall: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Messenger for ScriptedMessenger {
        async fn deliver(&self, _channel: &UserChannel, message: &str) -> Result<(), NotifierError> {
            self.sent.lock().push(message.to_string());
            let stall = self.stall.lock().take();
            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
            self.results.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn alert() -> Alert {
        let mut alert = Alert::new(ProfileKey::parse("someone").unwrap(), UserId(3), 1000);
        alert.id = AlertId(42);
        alert.trigger(chrono::Utc::now());
        alert
    }

    fn dispatcher(messenger: Arc<ScriptedMessenger>, max_attempts: u32) -> NotificationDispatcher {
        NotificationDispatcher::new(
            messenger,
            Arc::new(AttemptLog::new()),
            RetryPolicy::new(max_attempts, Duration::from_millis(1), 2.0, Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_log_notification() {
        let notifier = Notifier::new(None, "http://localhost", Duration::from_secs(5)).unwrap();

        // Log notification should always succeed
        let result = notifier.deliver(&UserChannel::Log, "test message").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_telegram_without_token_is_permanent() {
        let notifier = Notifier::new(None, "http://localhost", Duration::from_secs(5)).unwrap();
        let err = notifier
            .deliver(&UserChannel::Telegram { chat_id: "1".into() }, "hi")
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_silent_webhook_hits_client_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever answering
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = Notifier::new(None, "http://localhost", Duration::from_millis(100)).unwrap();
        let channel = UserChannel::Webhook {
            url: format!("http://{}/hook", addr),
            headers: HashMap::new(),
        };

        let err = tokio::time::timeout(Duration::from_secs(5), notifier.deliver(&channel, "hi"))
            .await
            .expect("client timeout should fire first")
            .unwrap_err();
        assert!(matches!(err, NotifierError::Unavailable(_)));
        assert!(!err.is_permanent());

        server.abort();
    }

    #[test]
    fn test_classify_response() {
        assert!(classify_response("Telegram", StatusCode::BAD_REQUEST, "chat not found").is_permanent());
        assert!(!classify_response("Telegram", StatusCode::TOO_MANY_REQUESTS, "").is_permanent());
        assert!(!classify_response("Webhook", StatusCode::BAD_GATEWAY, "").is_permanent());
    }

    #[tokio::test]
    async fn test_delivered_first_try() {
        let messenger = ScriptedMessenger::new(vec![Ok(())]);
        let dispatcher = dispatcher(messenger.clone(), 3);
        let alert = alert();

        let delivery = dispatcher.send(&alert, Some(&UserChannel::Log), "hello").await.unwrap();
        assert_eq!(delivery, Delivery::Sent { attempts: 1 });

        let attempts = dispatcher.attempts().for_alert(alert.id);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, DeliveryOutcome::Delivered);

        // Never sends twice for the same alert
        let again = dispatcher.send(&alert, Some(&UserChannel::Log), "hello").await.unwrap();
        assert_eq!(again, Delivery::AlreadyDelivered);
        assert_eq!(messenger.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let messenger = ScriptedMessenger::new(vec![
            Err(NotifierError::Unavailable("502".into())),
            Ok(()),
        ]);
        let dispatcher = dispatcher(messenger, 3);
        let alert = alert();

        let delivery = dispatcher.send(&alert, Some(&UserChannel::Log), "hello").await.unwrap();
        assert_eq!(delivery, Delivery::Sent { attempts: 2 });

        let outcomes: Vec<DeliveryOutcome> = dispatcher
            .attempts()
            .for_alert(alert.id)
            .iter()
            .map(|a| a.outcome)
            .collect();
        assert_eq!(outcomes, vec![DeliveryOutcome::Failed, DeliveryOutcome::Delivered]);
    }

    #[tokio::test]
    async fn test_exhausted_leaves_alert_triggered() {
        let messenger = ScriptedMessenger::new(vec![
            Err(NotifierError::Unavailable("down".into())),
            Err(NotifierError::Unavailable("down".into())),
        ]);
        let dispatcher = dispatcher(messenger.clone(), 2);
        let alert = alert();

        let err = dispatcher.send(&alert, Some(&UserChannel::Log), "hello").await.unwrap_err();
        assert!(matches!(err, DispatchError::Exhausted { attempts: 2, .. }));
        assert_eq!(messenger.sent.lock().len(), 2);
        assert_eq!(dispatcher.attempts().exhausted(), vec![alert.id]);
        assert!(!alert.is_pending());
    }

    #[tokio::test]
    async fn test_permanent_error_stops_retrying() {
        let messenger = ScriptedMessenger::new(vec![Err(NotifierError::Rejected("chat not found".into()))]);
        let dispatcher = dispatcher(messenger.clone(), 5);

        let err = dispatcher.send(&alert(), Some(&UserChannel::Log), "hello").await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
        assert_eq!(messenger.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_channel_is_recorded() {
        let messenger = ScriptedMessenger::new(vec![]);
        let dispatcher = dispatcher(messenger.clone(), 3);
        let alert = alert();

        let err = dispatcher.send(&alert, None, "hello").await.unwrap_err();
        assert_eq!(err, DispatchError::NoChannel(3));
        assert!(messenger.sent.lock().is_empty());
        assert_eq!(dispatcher.attempts().for_alert(alert.id)[0].outcome, DeliveryOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_hanging_delivery_times_out_and_retries() {
        let messenger = ScriptedMessenger::new(vec![]);
        *messenger.stall.lock() = Some(Duration::from_secs(3600));
        let dispatcher = dispatcher(messenger.clone(), 2).with_send_timeout(Duration::from_millis(20));
        let alert = alert();

        let delivery = dispatcher.send(&alert, Some(&UserChannel::Log), "hello").await.unwrap();
        assert_eq!(delivery, Delivery::Sent { attempts: 2 });

        let attempts = dispatcher.attempts().for_alert(alert.id);
        assert_eq!(attempts[0].outcome, DeliveryOutcome::Failed);
        assert!(attempts[0].detail.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_abandon_records_exhausted_once() {
        let messenger = ScriptedMessenger::new(vec![Err(NotifierError::Unavailable("down".into()))]);
        let dispatcher = dispatcher(messenger, 1);
        let pending = alert();
        let mut delivered = alert();
        delivered.id = AlertId(43);

        dispatcher.send(&pending, Some(&UserChannel::Log), "hello").await.unwrap_err();
        dispatcher.send(&delivered, Some(&UserChannel::Log), "hello").await.unwrap();

        assert!(dispatcher.abandon(&pending, "deadline reached"));
        assert!(!dispatcher.abandon(&delivered, "deadline reached"));

        let last = dispatcher.attempts().for_alert(pending.id).pop().unwrap();
        assert_eq!(last.outcome, DeliveryOutcome::Exhausted);
        assert_eq!(last.attempt, 1);
        assert_eq!(dispatcher.attempts().exhausted(), vec![pending.id]);
    }
}

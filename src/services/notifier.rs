//! notifier.rs
//!
//! Доставка уведомлений пользователям после изменений в очереди.
//!
//! Ядро вызывает `Notifier::notify` уже после фиксации транзакции, поэтому
//! сбой доставки никогда не откатывает бизнес-операцию.
//!
//! Реализации:
//! 1.  **RedisNotifier**: кладёт уведомление во входящие пользователя
//!     (`notifications:{user}`) и публикует его в канал `notifications`.
//! 2.  **WebhookNotifier**: отправляет POST на внешний адрес через `reqwest`,
//!     вызовы защищены автоматическим выключателем `failsafe`.
//! 3.  **FanoutNotifier**: рассылает по всем вложенным каналам.
//! 4.  **RecordingNotifier**: запоминает уведомления, только с фичей `testing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as _;
use failsafe::{backoff, failure_policy, Config as BreakerConfig, StateMachine};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::inbox::{inbox_key, INBOX_LIMIT, NOTIFICATION_CHANNEL};
use crate::config::{CircuitBreakerConfig, NotificationConfig};
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QueueJoined,
    QueueCalled,
    CompanionMatched,
    CompanionWithdrawn,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::QueueJoined => "queue_joined",
            NotificationKind::QueueCalled => "queue_called",
            NotificationKind::CompanionMatched => "companion_matched",
            NotificationKind::CompanionWithdrawn => "companion_withdrawn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) -> Self {
        Self { id: Uuid::new_v4(), user_id, kind, payload, created_at: Utc::now() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Выключатель разомкнут, вызов не выполнялся.
    #[error("webhook circuit breaker is open")]
    CircuitOpen,
    #[error("{0} of {1} notification channels failed")]
    Partial(usize, usize),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Входящие пользователя в redis плюс pub/sub для подключённых клиентов.
#[derive(Clone)]
pub struct RedisNotifier {
    redis: RedisClient,
}

impl RedisNotifier {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let data = serde_json::to_string(notification)?;
        let key = inbox_key(notification.user_id);
        let mut conn = self.redis.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .lpush(&key, &data)
            .ignore()
            .ltrim(&key, 0, INBOX_LIMIT - 1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        let receivers: i64 = conn.publish(NOTIFICATION_CHANNEL, &data).await?;

        debug!(
            user_id = %notification.user_id,
            kind = notification.kind.as_str(),
            receivers,
            "notification stored"
        );
        Ok(())
    }
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// Отправка уведомлений на внешний HTTP-адрес.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
    circuit_breaker: Breaker,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration, breaker: &CircuitBreakerConfig) -> Result<Self, NotifyError> {
        let policy = failure_policy::consecutive_failures(
            breaker.failure_threshold,
            backoff::constant(Duration::from_secs(breaker.timeout_seconds)),
        );
        let circuit_breaker = BreakerConfig::new().failure_policy(policy).build();

        Ok(Self {
            url,
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            circuit_breaker,
        })
    }

    pub fn from_config(config: &NotificationConfig, breaker: &CircuitBreakerConfig) -> Result<Option<Self>, NotifyError> {
        match &config.webhook_url {
            Some(url) => Self::new(url.clone(), Duration::from_secs(config.timeout_seconds), breaker).map(Some),
            None => Ok(None),
        }
    }

    async fn post(&self, notification: &Notification) -> Result<(), reqwest::Error> {
        self.http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self.circuit_breaker.call(self.post(notification)).await {
            Ok(()) => Ok(()),
            Err(failsafe::Error::Rejected) => {
                warn!(url = %self.url, "circuit breaker is open, webhook notification dropped");
                Err(NotifyError::CircuitOpen)
            }
            Err(failsafe::Error::Inner(e)) => {
                error!(url = %self.url, error = %e, "webhook notification failed");
                Err(NotifyError::Http(e))
            }
        }
    }
}

/// Рассылает уведомление по всем каналам; ошибка одного не мешает остальным.
#[derive(Clone)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let results = futures::future::join_all(self.targets.iter().map(|t| t.notify(notification))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed == 0 {
            Ok(())
        } else {
            Err(NotifyError::Partial(failed, results.len()))
        }
    }
}

/// Складывает уведомления в память.
#[cfg(any(test, feature = "testing"))]
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<std::sync::Mutex<Vec<Notification>>>,
}

#[cfg(any(test, feature = "testing"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, user_id: Uuid) -> Vec<NotificationKind> {
        self.sent().into_iter().filter(|n| n.user_id == user_id).map(|n| n.kind).collect()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn breaker(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold, timeout_seconds: 60 }
    }

    fn sample() -> Notification {
        Notification::new(
            Uuid::new_v4(),
            NotificationKind::QueueCalled,
            serde_json::json!({ "queue_number": 3 }),
        )
    }

    #[tokio::test]
    async fn webhook_posts_notification_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/queue"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/hooks/queue", server.uri()),
            Duration::from_secs(2),
            &breaker(3),
        )
        .unwrap();
        notifier.notify(&sample()).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: Notification = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body.kind, NotificationKind::QueueCalled);
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(2), &breaker(2)).unwrap();
        assert!(matches!(notifier.notify(&sample()).await, Err(NotifyError::Http(_))));
        assert!(matches!(notifier.notify(&sample()).await, Err(NotifyError::Http(_))));
        assert!(matches!(notifier.notify(&sample()).await, Err(NotifyError::CircuitOpen)));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fanout_reports_partial_failure() {
        struct Failing;

        #[async_trait]
        impl Notifier for Failing {
            async fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
                Err(NotifyError::CircuitOpen)
            }
        }

        let recorder = RecordingNotifier::new();
        let targets: Vec<Arc<dyn Notifier>> = vec![Arc::new(recorder.clone()), Arc::new(Failing)];
        let fanout = FanoutNotifier::new(targets);
        let result = fanout.notify(&sample()).await;

        assert!(matches!(result, Err(NotifyError::Partial(1, 2))));
        assert_eq!(recorder.sent().len(), 1);
    }
}

pub mod admission;
pub mod catalog;
pub mod dispatcher;
pub mod ledger;
pub mod matching;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod tickets;

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::QueuePolicy;
use crate::store::DocumentStore;
use notifier::{Notification, NotificationKind, Notifier};
use retry::RetryPolicy;
use tickets::TicketVerifier;

/// Зависимости движков очереди. Передаются явно через конструкторы,
/// глобального состояния нет.
#[derive(Clone)]
pub struct CoreContext {
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
    /// `None`: проверка билета при входе в очередь отключена.
    pub tickets: Option<Arc<dyn TicketVerifier>>,
    pub policy: QueuePolicy,
    pub retry: RetryPolicy,
}

impl CoreContext {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            tickets: None,
            policy: QueuePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_tickets(mut self, tickets: Arc<dyn TicketVerifier>) -> Self {
        self.tickets = Some(tickets);
        self
    }

    pub fn with_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // Уведомления не должны откатывать основную операцию: ошибку только логируем
    pub(crate) async fn notify(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        let notification = Notification::new(user_id, kind, payload);
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(%user_id, kind = kind.as_str(), error = %e, "notification dispatch failed");
        }
    }
}

/// Движки ядра, собранные вокруг одного контекста.
#[derive(Clone)]
pub struct QueueCore {
    pub catalog: catalog::EventCatalog,
    pub admission: admission::AdmissionEngine,
    pub matching: matching::MatchingEngine,
    pub dispatcher: dispatcher::Dispatcher,
}

impl QueueCore {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            catalog: catalog::EventCatalog::new(ctx.clone()),
            admission: admission::AdmissionEngine::new(ctx.clone()),
            matching: matching::MatchingEngine::new(ctx.clone()),
            dispatcher: dispatcher::Dispatcher::new(ctx),
        }
    }
}

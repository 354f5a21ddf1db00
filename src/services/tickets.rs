use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::QueueResult;

/// Проверка, что у пользователя есть подтверждённый билет на событие.
#[async_trait]
pub trait TicketVerifier: Send + Sync {
    async fn is_ticket_valid(&self, user_id: Uuid, event_id: Uuid) -> QueueResult<bool>;
}

#[derive(Clone)]
pub struct PgTicketVerifier {
    pool: Pool<Postgres>,
}

impl PgTicketVerifier {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketVerifier for PgTicketVerifier {
    async fn is_ticket_valid(&self, user_id: Uuid, event_id: Uuid) -> QueueResult<bool> {
        let valid: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM tickets
                WHERE user_id = $1 AND event_id = $2 AND status = 'verified'
            )",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(valid)
    }
}

/// Фиксированный набор пар (пользователь, событие) с билетами.
#[cfg(any(test, feature = "testing"))]
#[derive(Clone, Default)]
pub struct StaticTicketVerifier {
    verified: Vec<(Uuid, Uuid)>,
}

#[cfg(any(test, feature = "testing"))]
impl StaticTicketVerifier {
    pub fn new(verified: Vec<(Uuid, Uuid)>) -> Self {
        Self { verified }
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl TicketVerifier for StaticTicketVerifier {
    async fn is_ticket_valid(&self, user_id: Uuid, event_id: Uuid) -> QueueResult<bool> {
        Ok(self.verified.contains(&(user_id, event_id)))
    }
}

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::notifier::NotificationKind;
use super::retry::with_retry;
use super::{ledger, CoreContext};
use crate::error::{QueueError, QueueResult};
use crate::models::{CompanionRole, CompanionStatus, QueueEntry, QueueStatus};
use crate::store::LockMode;

/// Вызов следующего по очереди и отметка о входе.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: CoreContext,
}

impl Dispatcher {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Вызывает ожидающую запись с наименьшим номером. Если ждущих нет,
    /// возвращает `None` и ничего не меняет.
    pub async fn call_next(&self, time_slot_id: Uuid) -> QueueResult<Option<QueueEntry>> {
        let called = with_retry(self.ctx.retry, "call_next", move || self.try_call_next(time_slot_id)).await?;

        let Some(entry) = called else {
            debug!(%time_slot_id, "nobody is waiting");
            return Ok(None);
        };

        info!(
            queue_id = %entry.id,
            %time_slot_id,
            queue_number = entry.queue_number,
            "queue entry called"
        );
        self.ctx
            .notify(
                entry.user_id,
                NotificationKind::QueueCalled,
                json!({
                    "queue_id": entry.id,
                    "time_slot_id": time_slot_id,
                    "queue_number": entry.queue_number,
                }),
            )
            .await;
        Ok(Some(entry))
    }

    async fn try_call_next(&self, time_slot_id: Uuid) -> QueueResult<Option<QueueEntry>> {
        let now = Utc::now();
        let mut tx = self.ctx.store.begin().await?;

        if tx.time_slot(time_slot_id, LockMode::ForUpdate).await?.is_none() {
            return Err(QueueError::SlotNotFound(time_slot_id));
        }
        let Some(mut entry) = tx.next_waiting_entry(time_slot_id).await? else {
            return Ok(None);
        };

        entry.status = QueueStatus::Called;
        entry.called_at = Some(now);
        entry.updated_at = now;
        tx.update_queue_entry(&entry).await?;

        ledger::release_in(tx.as_mut(), time_slot_id, now).await?;

        if entry.companion.as_ref().map(|l| l.role) == Some(CompanionRole::Companion) {
            if let Some(mut companion) = tx.companion_for_queue(entry.user_id, entry.id).await? {
                companion.status = CompanionStatus::Active;
                tx.update_companion(&companion).await?;
            }
        }

        tx.commit().await?;
        Ok(Some(entry))
    }

    /// Отмечает вход вызванного человека. Терминальное состояние.
    pub async fn mark_entered(&self, queue_id: Uuid) -> QueueResult<QueueEntry> {
        let entry = with_retry(self.ctx.retry, "mark_entered", move || async move {
            let now = Utc::now();
            let mut tx = self.ctx.store.begin().await?;
            let mut entry = tx
                .queue_entry(queue_id, LockMode::ForUpdate)
                .await?
                .ok_or_else(|| QueueError::not_found("queue entry", queue_id))?;
            match entry.status {
                QueueStatus::Called => {}
                QueueStatus::Cancelled => return Err(QueueError::AlreadyCancelled),
                other => return Err(QueueError::InvalidState(format!("cannot mark a {} entry as entered", other))),
            }
            entry.status = QueueStatus::Entered;
            entry.entered_at = Some(now);
            entry.updated_at = now;
            tx.update_queue_entry(&entry).await?;
            tx.commit().await?;
            Ok(entry)
        })
        .await?;

        info!(%queue_id, queue_number = entry.queue_number, "person entered");
        Ok(entry)
    }
}

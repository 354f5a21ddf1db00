//! admission.rs
//!
//! Вход в очередь и выход из неё.
//!
//! Выдача номера и резерв места происходят в одной транзакции под
//! блокировкой строки слота, поэтому параллельные входы в один слот
//! выстраиваются друг за другом, а разные слоты идут параллельно.
//! Номера никогда не переиспользуются: следующий номер считается по всем
//! записям слота, включая отменённые.

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::matching::dissolve_match;
use super::notifier::NotificationKind;
use super::retry::with_retry;
use super::{ledger, CoreContext};
use crate::error::{QueueError, QueueResult};
use crate::models::{QueueEntry, QueueStatus, QueueSummary, RequestStatus};
use crate::store::LockMode;

#[derive(Clone)]
pub struct AdmissionEngine {
    ctx: CoreContext,
}

impl AdmissionEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Ставит пользователя в очередь слота.
    pub async fn join_queue(&self, event_id: Uuid, time_slot_id: Uuid, user_id: Uuid) -> QueueResult<QueueEntry> {
        if let Some(tickets) = &self.ctx.tickets {
            if !tickets.is_ticket_valid(user_id, event_id).await? {
                return Err(QueueError::TicketNotVerified);
            }
        }

        // Быстрый отказ без блокировки слота; внутри транзакции проверяется повторно
        let existing = with_retry(self.ctx.retry, "join_queue_precheck", move || async move {
            let mut tx = self.ctx.store.begin().await?;
            let existing = tx.active_entry_for_user(event_id, time_slot_id, user_id).await?;
            Ok(existing)
        })
        .await?;
        if existing.is_some() {
            return Err(QueueError::DuplicateEntry);
        }

        let entry = with_retry(self.ctx.retry, "join_queue", move || {
            self.try_join(event_id, time_slot_id, user_id)
        })
        .await?;

        info!(
            queue_id = %entry.id,
            %user_id,
            %time_slot_id,
            queue_number = entry.queue_number,
            "user joined queue"
        );
        self.ctx
            .notify(
                user_id,
                NotificationKind::QueueJoined,
                json!({
                    "queue_id": entry.id,
                    "event_id": event_id,
                    "time_slot_id": time_slot_id,
                    "queue_number": entry.queue_number,
                    "estimated_wait_minutes": entry.estimated_wait_minutes,
                }),
            )
            .await;
        Ok(entry)
    }

    async fn try_join(&self, event_id: Uuid, time_slot_id: Uuid, user_id: Uuid) -> QueueResult<QueueEntry> {
        let now = Utc::now();
        let mut tx = self.ctx.store.begin().await?;

        let slot = tx
            .time_slot(time_slot_id, LockMode::ForUpdate)
            .await?
            .filter(|slot| slot.event_id == event_id)
            .ok_or(QueueError::SlotNotFound(time_slot_id))?;

        let event = tx
            .event(slot.event_id)
            .await?
            .ok_or_else(|| QueueError::not_found("event", event_id))?;
        if !event.status.accepts_entries() {
            return Err(QueueError::EventClosed);
        }

        if tx.active_entry_for_user(event_id, time_slot_id, user_id).await?.is_some() {
            return Err(QueueError::DuplicateEntry);
        }

        ledger::try_reserve(tx.as_mut(), slot.id, now).await?;

        let queue_number = tx.max_queue_number(event_id, time_slot_id).await?.unwrap_or(0) + 1;
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            event_id,
            time_slot_id,
            user_id,
            queue_number,
            original_queue_number: queue_number,
            status: QueueStatus::Waiting,
            estimated_wait_minutes: queue_number * self.ctx.policy.service_minutes_per_person,
            companion: None,
            created_at: now,
            updated_at: now,
            called_at: None,
            entered_at: None,
        };
        tx.insert_queue_entry(&entry).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Отменяет запись. Номер остаётся за записью, место в слоте
    /// освобождается отдельным шагом.
    pub async fn cancel_queue(&self, queue_id: Uuid, user_id: Uuid) -> QueueResult<QueueEntry> {
        let (entry, held_capacity) = with_retry(self.ctx.retry, "cancel_queue", move || {
            self.try_cancel(queue_id, user_id)
        })
        .await?;

        info!(%queue_id, %user_id, queue_number = entry.queue_number, "queue entry cancelled");

        // called-записи уже вернули место при вызове
        if held_capacity {
            self.release_capacity(entry.time_slot_id).await;
        }
        Ok(entry)
    }

    async fn try_cancel(&self, queue_id: Uuid, user_id: Uuid) -> QueueResult<(QueueEntry, bool)> {
        let now = Utc::now();
        let mut tx = self.ctx.store.begin().await?;

        let time_slot_id = tx
            .queue_entry(queue_id, LockMode::Read)
            .await?
            .ok_or_else(|| QueueError::not_found("queue entry", queue_id))?
            .time_slot_id;
        // порядок блокировок: сначала слот, потом записи
        tx.time_slot(time_slot_id, LockMode::ForUpdate).await?;

        let mut entry = tx
            .queue_entry(queue_id, LockMode::ForUpdate)
            .await?
            .ok_or_else(|| QueueError::not_found("queue entry", queue_id))?;
        if entry.user_id != user_id {
            return Err(QueueError::Permission("queue entry belongs to another user".to_string()));
        }
        match entry.status {
            QueueStatus::Cancelled => return Err(QueueError::AlreadyCancelled),
            QueueStatus::Entered => {
                return Err(QueueError::InvalidState("entered entries cannot be cancelled".to_string()))
            }
            QueueStatus::Waiting | QueueStatus::Called => {}
        }
        let held_capacity = entry.status == QueueStatus::Waiting;

        if let Some(link) = entry.companion.clone() {
            let request = tx.companion_request(link.request_id, LockMode::ForUpdate).await?;
            if let Some(request) = request {
                dissolve_match(tx.as_mut(), request, link.role, now).await?;
            }
            // dissolve_match мог обновить эту же запись
            entry = tx
                .queue_entry(queue_id, LockMode::ForUpdate)
                .await?
                .ok_or_else(|| QueueError::not_found("queue entry", queue_id))?;
        }

        entry.status = QueueStatus::Cancelled;
        entry.updated_at = now;
        tx.update_queue_entry(&entry).await?;

        for mut request in tx.requests_for_queue(user_id, queue_id).await? {
            if request.status == RequestStatus::Pending {
                request.status = RequestStatus::Cancelled;
                tx.update_companion_request(&request).await?;
            }
        }

        tx.commit().await?;
        Ok((entry, held_capacity))
    }

    async fn release_capacity(&self, time_slot_id: Uuid) {
        let result = with_retry(self.ctx.retry, "release_capacity", move || async move {
            let mut tx = self.ctx.store.begin().await?;
            ledger::release_in(tx.as_mut(), time_slot_id, Utc::now()).await?;
            tx.commit().await
        })
        .await;

        if let Err(e) = result {
            error!(%time_slot_id, error = %e, "failed to release slot capacity after cancellation");
        }
    }

    pub async fn entry(&self, queue_id: Uuid) -> QueueResult<QueueEntry> {
        let mut tx = self.ctx.store.begin().await?;
        let entry = tx.queue_entry(queue_id, LockMode::Read).await?;
        entry.ok_or_else(|| QueueError::not_found("queue entry", queue_id))
    }

    /// Активные (waiting или called) записи пользователя, новые первыми.
    pub async fn user_queues(&self, user_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let mut tx = self.ctx.store.begin().await?;
        let entries = tx.entries_for_user(user_id).await?;
        Ok(entries.into_iter().filter(|e| e.status.is_active()).collect())
    }

    pub async fn slot_entries(&self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let mut tx = self.ctx.store.begin().await?;
        let entries = tx.entries_for_slot(event_id, time_slot_id).await?;
        Ok(entries)
    }

    pub async fn queue_summary(&self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<QueueSummary> {
        let entries = self.slot_entries(event_id, time_slot_id).await?;
        let count = |status: QueueStatus| entries.iter().filter(|e| e.status == status).count() as i64;
        let waiting_count = count(QueueStatus::Waiting);

        Ok(QueueSummary {
            event_id,
            time_slot_id,
            total_count: entries.len() as i64,
            waiting_count,
            called_count: count(QueueStatus::Called),
            entered_count: count(QueueStatus::Entered),
            estimated_wait_minutes: waiting_count * i64::from(self.ctx.policy.service_minutes_per_person),
        })
    }
}

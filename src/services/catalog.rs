//! catalog.rs
//!
//! Каталог событий и их временных слотов: создание, статусы,
//! администрирование вместимости.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::retry::with_retry;
use super::{ledger, CoreContext};
use crate::error::{QueueError, QueueResult};
use crate::models::{Event, EventStatus, SlotStatus, TimeSlot, TimeSlotSummary};
use crate::store::LockMode;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewTimeSlot {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[validate(range(min = 1, max = 100000))]
    pub max_capacity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewEvent {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    #[validate(length(min = 1, max = 200))]
    pub location: String,
    #[validate(range(min = 1))]
    pub capacity: i32,
    pub status: Option<EventStatus>,
    #[validate(nested)]
    #[serde(default)]
    pub time_slots: Vec<NewTimeSlot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventWithSlots {
    #[serde(flatten)]
    pub event: Event,
    pub time_slots: Vec<TimeSlot>,
}

#[derive(Clone)]
pub struct EventCatalog {
    ctx: CoreContext,
}

impl EventCatalog {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Создаёт событие вместе со слотами одной транзакцией.
    pub async fn create_event(&self, new_event: NewEvent) -> QueueResult<EventWithSlots> {
        new_event.validate()?;
        if let Some(slot) = new_event.time_slots.iter().find(|s| s.end_time <= s.start_time) {
            return Err(QueueError::Validation(format!(
                "time slot {}-{} ends before it starts",
                slot.start_time, slot.end_time
            )));
        }

        let new_event = &new_event;
        let created = with_retry(self.ctx.retry, "create_event", move || async move {
            let now = Utc::now();
            let mut tx = self.ctx.store.begin().await?;

            let event = Event {
                id: Uuid::new_v4(),
                name: new_event.name.clone(),
                description: new_event.description.clone(),
                date: new_event.date,
                location: new_event.location.clone(),
                capacity: new_event.capacity,
                status: new_event.status.unwrap_or(EventStatus::Upcoming),
                created_at: now,
                updated_at: now,
            };
            tx.insert_event(&event).await?;

            let mut time_slots = Vec::with_capacity(new_event.time_slots.len());
            for spec in &new_event.time_slots {
                let slot = TimeSlot {
                    id: Uuid::new_v4(),
                    event_id: event.id,
                    start_time: spec.start_time,
                    end_time: spec.end_time,
                    max_capacity: spec.max_capacity,
                    current_count: 0,
                    status: SlotStatus::Available,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_time_slot(&slot).await?;
                time_slots.push(slot);
            }

            tx.commit().await?;
            Ok(EventWithSlots { event, time_slots })
        })
        .await?;

        info!(
            event_id = %created.event.id,
            name = %created.event.name,
            slots = created.time_slots.len(),
            "event created"
        );
        Ok(created)
    }

    pub async fn list_events(&self) -> QueueResult<Vec<Event>> {
        let mut tx = self.ctx.store.begin().await?;
        let events = tx.list_events().await?;
        Ok(events)
    }

    pub async fn event(&self, event_id: Uuid) -> QueueResult<Event> {
        let mut tx = self.ctx.store.begin().await?;
        let event = tx.event(event_id).await?;
        event.ok_or_else(|| QueueError::not_found("event", event_id))
    }

    pub async fn update_event_status(&self, event_id: Uuid, status: EventStatus) -> QueueResult<Event> {
        let event = with_retry(self.ctx.retry, "update_event_status", move || async move {
            let mut tx = self.ctx.store.begin().await?;
            let mut event = tx
                .event(event_id)
                .await?
                .ok_or_else(|| QueueError::not_found("event", event_id))?;
            event.status = status;
            event.updated_at = Utc::now();
            tx.update_event(&event).await?;
            tx.commit().await?;
            Ok(event)
        })
        .await?;

        info!(%event_id, status = %status, "event status updated");
        Ok(event)
    }

    pub async fn time_slots(&self, event_id: Uuid) -> QueueResult<Vec<TimeSlot>> {
        let mut tx = self.ctx.store.begin().await?;
        if tx.event(event_id).await?.is_none() {
            return Err(QueueError::not_found("event", event_id));
        }
        let slots = tx.time_slots_for_event(event_id).await?;
        Ok(slots)
    }

    pub async fn time_slot(&self, time_slot_id: Uuid) -> QueueResult<TimeSlot> {
        let mut tx = self.ctx.store.begin().await?;
        let slot = tx.time_slot(time_slot_id, LockMode::Read).await?;
        slot.ok_or(QueueError::SlotNotFound(time_slot_id))
    }

    pub async fn slot_summary(&self, time_slot_id: Uuid) -> QueueResult<TimeSlotSummary> {
        Ok(self.time_slot(time_slot_id).await?.summary())
    }

    /// Меняет вместимость слота. Меньше текущего числа людей нельзя.
    pub async fn update_slot_capacity(&self, time_slot_id: Uuid, max_capacity: i32) -> QueueResult<TimeSlot> {
        let slot = self
            .modify_slot("update_slot_capacity", time_slot_id, move |slot| {
                ledger::resize(slot, max_capacity, Utc::now())
            })
            .await?;
        info!(%time_slot_id, max_capacity, status = %slot.status, "slot capacity updated");
        Ok(slot)
    }

    pub async fn set_slot_closed(&self, time_slot_id: Uuid, closed: bool) -> QueueResult<TimeSlot> {
        let slot = self
            .modify_slot("set_slot_closed", time_slot_id, move |slot| {
                ledger::set_closed(slot, closed, Utc::now());
                Ok(())
            })
            .await?;
        info!(%time_slot_id, status = %slot.status, "slot status changed");
        Ok(slot)
    }

    async fn modify_slot<F>(&self, operation: &'static str, time_slot_id: Uuid, change: F) -> QueueResult<TimeSlot>
    where
        F: Fn(&mut TimeSlot) -> QueueResult<()> + Copy + Send + Sync,
    {
        with_retry(self.ctx.retry, operation, move || async move {
            let mut tx = self.ctx.store.begin().await?;
            let mut slot = tx
                .time_slot(time_slot_id, LockMode::ForUpdate)
                .await?
                .ok_or(QueueError::SlotNotFound(time_slot_id))?;
            change(&mut slot)?;
            tx.update_time_slot(&slot).await?;
            tx.commit().await?;
            Ok(slot)
        })
        .await
    }
}

#![allow(dead_code)]

use chrono::{NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use queue_system::models::{QueueEntry, TimeSlot};
use queue_system::services::catalog::{NewEvent, NewTimeSlot};
use queue_system::services::notifier::RecordingNotifier;
use queue_system::services::retry::RetryPolicy;
use queue_system::services::tickets::TicketVerifier;
use queue_system::services::{CoreContext, QueueCore};
use queue_system::store::MemoryStore;

/// Ядро очереди поверх памяти с записывающим уведомителем.
pub struct Harness {
    pub store: MemoryStore,
    pub notifier: RecordingNotifier,
    pub core: QueueCore,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, backoff: Duration::from_millis(1) }
}

fn context(store: &MemoryStore, notifier: &RecordingNotifier) -> CoreContext {
    CoreContext::new(Arc::new(store.clone()), Arc::new(notifier.clone())).with_retry(fast_retry())
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let core = QueueCore::new(context(&store, &notifier));
        Self { store, notifier, core }
    }

    /// Второе ядро над тем же хранилищем, но с проверкой билетов.
    pub fn gated(&self, tickets: Arc<dyn TicketVerifier>) -> QueueCore {
        QueueCore::new(context(&self.store, &self.notifier).with_tickets(tickets))
    }

    /// Событие с одним слотом заданной вместимости.
    pub async fn slot(&self, max_capacity: i32) -> TimeSlot {
        self.slots(&[max_capacity]).await.remove(0)
    }

    /// Событие с несколькими слотами, по слоту на каждую вместимость.
    pub async fn slots(&self, capacities: &[i32]) -> Vec<TimeSlot> {
        let time_slots = capacities
            .iter()
            .enumerate()
            .map(|(i, &max_capacity)| NewTimeSlot {
                start_time: NaiveTime::from_hms_opt(9 + i as u32, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(9 + i as u32, 50, 0).unwrap(),
                max_capacity,
            })
            .collect();
        let created = self
            .core
            .catalog
            .create_event(NewEvent {
                name: "Pop-up store opening".to_string(),
                description: None,
                date: Utc::now(),
                location: "Seongsu".to_string(),
                capacity: 1000,
                status: None,
                time_slots,
            })
            .await
            .unwrap();
        created.time_slots
    }

    pub async fn join(&self, slot: &TimeSlot, user_id: Uuid) -> QueueEntry {
        self.core
            .admission
            .join_queue(slot.event_id, slot.id, user_id)
            .await
            .unwrap()
    }

    /// `n` новых пользователей по очереди встают в слот.
    pub async fn join_many(&self, slot: &TimeSlot, n: usize) -> Vec<QueueEntry> {
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            entries.push(self.join(slot, Uuid::new_v4()).await);
        }
        entries
    }

    pub async fn slot_state(&self, slot_id: Uuid) -> TimeSlot {
        self.core.catalog.time_slot(slot_id).await.unwrap()
    }

    pub async fn entry(&self, queue_id: Uuid) -> QueueEntry {
        self.core.admission.entry(queue_id).await.unwrap()
    }
}

//! In-memory реализация хранилища для тестов.
//!
//! Транзакция захватывает общий мьютекс на всё время жизни и работает с
//! копией состояния; `commit` записывает копию обратно. Это даёт полную
//! сериализацию транзакций, как у блокировок строк в Postgres, только грубее.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{DocumentStore, LockMode, StoreTx};
use crate::error::{QueueError, QueueResult};
use crate::models::{Companion, CompanionRequest, Event, QueueEntry, TimeSlot};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    events: HashMap<Uuid, Event>,
    time_slots: HashMap<Uuid, TimeSlot>,
    entries: HashMap<Uuid, QueueEntry>,
    requests: HashMap<Uuid, CompanionRequest>,
    companions: HashMap<Uuid, Companion>,
}

#[derive(Debug, Default)]
struct FaultInjection {
    failing_begins: AtomicU32,
    fail_slot_updates: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<FaultInjection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Следующие `n` вызовов `begin` вернут `Transient`.
    pub fn fail_next_begins(&self, n: u32) {
        self.faults.failing_begins.store(n, Ordering::SeqCst);
    }

    /// Включает отказ при записи временных слотов.
    pub fn fail_slot_updates(&self, fail: bool) {
        self.faults.fail_slot_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> QueueResult<Box<dyn StoreTx>> {
        let injected = self
            .faults
            .failing_begins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(QueueError::Transient("injected contention".to_string()));
        }

        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working, faults: self.faults.clone() }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<FaultInjection>,
}

fn sorted<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn event(&mut self, id: Uuid) -> QueueResult<Option<Event>> {
        Ok(self.working.events.get(&id).cloned())
    }

    async fn list_events(&mut self) -> QueueResult<Vec<Event>> {
        let events = self.working.events.values().cloned().collect();
        Ok(sorted(events, |e: &Event| e.date))
    }

    async fn insert_event(&mut self, event: &Event) -> QueueResult<()> {
        self.working.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn update_event(&mut self, event: &Event) -> QueueResult<()> {
        self.working.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn time_slot(&mut self, id: Uuid, _lock: LockMode) -> QueueResult<Option<TimeSlot>> {
        Ok(self.working.time_slots.get(&id).cloned())
    }

    async fn time_slots_for_event(&mut self, event_id: Uuid) -> QueueResult<Vec<TimeSlot>> {
        let slots = self
            .working
            .time_slots
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        Ok(sorted(slots, |s: &TimeSlot| s.start_time))
    }

    async fn insert_time_slot(&mut self, slot: &TimeSlot) -> QueueResult<()> {
        self.working.time_slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn update_time_slot(&mut self, slot: &TimeSlot) -> QueueResult<()> {
        if self.faults.fail_slot_updates.load(Ordering::SeqCst) {
            return Err(QueueError::Transient("injected slot write failure".to_string()));
        }
        self.working.time_slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn queue_entry(&mut self, id: Uuid, _lock: LockMode) -> QueueResult<Option<QueueEntry>> {
        Ok(self.working.entries.get(&id).cloned())
    }

    async fn active_entry_for_user(
        &mut self,
        event_id: Uuid,
        time_slot_id: Uuid,
        user_id: Uuid,
    ) -> QueueResult<Option<QueueEntry>> {
        Ok(self
            .working
            .entries
            .values()
            .find(|e| {
                e.event_id == event_id
                    && e.time_slot_id == time_slot_id
                    && e.user_id == user_id
                    && e.status != crate::models::QueueStatus::Cancelled
            })
            .cloned())
    }

    async fn max_queue_number(&mut self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Option<i32>> {
        Ok(self
            .working
            .entries
            .values()
            .filter(|e| e.event_id == event_id && e.time_slot_id == time_slot_id)
            .map(|e| e.queue_number.max(e.original_queue_number))
            .max())
    }

    async fn next_waiting_entry(&mut self, time_slot_id: Uuid) -> QueueResult<Option<QueueEntry>> {
        Ok(self
            .working
            .entries
            .values()
            .filter(|e| e.time_slot_id == time_slot_id && e.status == crate::models::QueueStatus::Waiting)
            .min_by_key(|e| (e.queue_number, e.original_queue_number))
            .cloned())
    }

    async fn entries_for_slot(&mut self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let entries = self
            .working
            .entries
            .values()
            .filter(|e| e.event_id == event_id && e.time_slot_id == time_slot_id)
            .cloned()
            .collect();
        Ok(sorted(entries, |e: &QueueEntry| (e.queue_number, e.original_queue_number)))
    }

    async fn entries_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let entries = self
            .working
            .entries
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted(entries, |e: &QueueEntry| std::cmp::Reverse(e.created_at)))
    }

    async fn insert_queue_entry(&mut self, entry: &QueueEntry) -> QueueResult<()> {
        self.working.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_queue_entry(&mut self, entry: &QueueEntry) -> QueueResult<()> {
        self.working.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn companion_request(&mut self, id: Uuid, _lock: LockMode) -> QueueResult<Option<CompanionRequest>> {
        Ok(self.working.requests.get(&id).cloned())
    }

    async fn requests_for_queue(&mut self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Vec<CompanionRequest>> {
        let requests = self
            .working
            .requests
            .values()
            .filter(|r| r.user_id == user_id && r.queue_id == queue_id)
            .cloned()
            .collect();
        Ok(sorted(requests, |r: &CompanionRequest| r.created_at))
    }

    async fn requests_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<CompanionRequest>> {
        let requests = self
            .working
            .requests
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted(requests, |r: &CompanionRequest| std::cmp::Reverse(r.created_at)))
    }

    async fn pending_requests(&mut self, time_slot_id: Option<Uuid>) -> QueueResult<Vec<CompanionRequest>> {
        let requests = self
            .working
            .requests
            .values()
            .filter(|r| r.status == crate::models::RequestStatus::Pending)
            .filter(|r| time_slot_id.map_or(true, |slot| r.time_slot_id == slot))
            .cloned()
            .collect();
        Ok(sorted(requests, |r: &CompanionRequest| r.created_at))
    }

    async fn insert_companion_request(&mut self, request: &CompanionRequest) -> QueueResult<()> {
        self.working.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_companion_request(&mut self, request: &CompanionRequest) -> QueueResult<()> {
        self.working.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn delete_companion_request(&mut self, id: Uuid) -> QueueResult<()> {
        self.working.requests.remove(&id);
        Ok(())
    }

    async fn companion_for_request(&mut self, request_id: Uuid) -> QueueResult<Option<Companion>> {
        Ok(self.working.companions.values().find(|c| c.request_id == request_id).cloned())
    }

    async fn companion_for_queue(&mut self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Option<Companion>> {
        Ok(self
            .working
            .companions
            .values()
            .find(|c| c.user_id == user_id && c.queue_id == queue_id)
            .cloned())
    }

    async fn companions_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<Companion>> {
        let companions = self
            .working
            .companions
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted(companions, |c: &Companion| std::cmp::Reverse(c.created_at)))
    }

    async fn insert_companion(&mut self, companion: &Companion) -> QueueResult<()> {
        self.working.companions.insert(companion.id, companion.clone());
        Ok(())
    }

    async fn update_companion(&mut self, companion: &Companion) -> QueueResult<()> {
        self.working.companions.insert(companion.id, companion.clone());
        Ok(())
    }

    async fn delete_companion(&mut self, id: Uuid) -> QueueResult<()> {
        self.working.companions.remove(&id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> QueueResult<()> {
        let MemoryTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}

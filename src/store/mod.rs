//! store
//!
//! Абстракция транзакционного хранилища документов. Движки очереди пишут
//! логику поверх `StoreTx` и не знают, что под ними: Postgres в проде или
//! память в тестах.
//!
//! Транзакция, которую не зафиксировали через `commit`, откатывается при drop.
//! In-memory хранилище собирается только для тестов и с фичей `testing`.

#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::models::{Companion, CompanionRequest, Event, QueueEntry, TimeSlot};

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Нужна ли блокировка строки до конца транзакции.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    ForUpdate,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn begin(&self) -> QueueResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // --- события ---
    async fn event(&mut self, id: Uuid) -> QueueResult<Option<Event>>;
    async fn list_events(&mut self) -> QueueResult<Vec<Event>>;
    async fn insert_event(&mut self, event: &Event) -> QueueResult<()>;
    async fn update_event(&mut self, event: &Event) -> QueueResult<()>;

    // --- временные слоты ---
    async fn time_slot(&mut self, id: Uuid, lock: LockMode) -> QueueResult<Option<TimeSlot>>;
    async fn time_slots_for_event(&mut self, event_id: Uuid) -> QueueResult<Vec<TimeSlot>>;
    async fn insert_time_slot(&mut self, slot: &TimeSlot) -> QueueResult<()>;
    async fn update_time_slot(&mut self, slot: &TimeSlot) -> QueueResult<()>;

    // --- записи очереди ---
    async fn queue_entry(&mut self, id: Uuid, lock: LockMode) -> QueueResult<Option<QueueEntry>>;
    /// Незакрытая (не cancelled) запись пользователя в слоте.
    async fn active_entry_for_user(
        &mut self,
        event_id: Uuid,
        time_slot_id: Uuid,
        user_id: Uuid,
    ) -> QueueResult<Option<QueueEntry>>;
    /// Максимальный номер среди всех записей слота, включая отменённые.
    async fn max_queue_number(&mut self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Option<i32>>;
    /// Первая ожидающая запись по возрастанию номера.
    async fn next_waiting_entry(&mut self, time_slot_id: Uuid) -> QueueResult<Option<QueueEntry>>;
    async fn entries_for_slot(&mut self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Vec<QueueEntry>>;
    async fn entries_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<QueueEntry>>;
    async fn insert_queue_entry(&mut self, entry: &QueueEntry) -> QueueResult<()>;
    async fn update_queue_entry(&mut self, entry: &QueueEntry) -> QueueResult<()>;

    // --- запросы на сопровождение ---
    async fn companion_request(&mut self, id: Uuid, lock: LockMode) -> QueueResult<Option<CompanionRequest>>;
    async fn requests_for_queue(&mut self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Vec<CompanionRequest>>;
    async fn requests_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<CompanionRequest>>;
    async fn pending_requests(&mut self, time_slot_id: Option<Uuid>) -> QueueResult<Vec<CompanionRequest>>;
    async fn insert_companion_request(&mut self, request: &CompanionRequest) -> QueueResult<()>;
    async fn update_companion_request(&mut self, request: &CompanionRequest) -> QueueResult<()>;
    async fn delete_companion_request(&mut self, id: Uuid) -> QueueResult<()>;

    // --- компаньоны ---
    async fn companion_for_request(&mut self, request_id: Uuid) -> QueueResult<Option<Companion>>;
    async fn companion_for_queue(&mut self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Option<Companion>>;
    async fn companions_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<Companion>>;
    async fn insert_companion(&mut self, companion: &Companion) -> QueueResult<()>;
    async fn update_companion(&mut self, companion: &Companion) -> QueueResult<()>;
    async fn delete_companion(&mut self, id: Uuid) -> QueueResult<()>;

    async fn commit(self: Box<Self>) -> QueueResult<()>;
}

//! Postgres-реализация хранилища поверх `sqlx::Transaction`.
//!
//! Конкурентный доступ к слоту сериализуется через `SELECT ... FOR UPDATE`
//! по строке `time_slots`: все операции, которые трогают счётчик или номера,
//! первым делом берут эту блокировку. Уникальные индексы в миграции
//! страхуют инварианты на случай ошибки в коде.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{DocumentStore, LockMode, StoreTx};
use crate::error::{QueueError, QueueResult};
use crate::models::{
    Companion, CompanionLink, CompanionRequest, Event, ParseStatusError, QueueEntry, TimeSlot,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn begin(&self) -> QueueResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn lock_clause(lock: LockMode) -> &'static str {
    match lock {
        LockMode::Read => "",
        LockMode::ForUpdate => " FOR UPDATE",
    }
}

fn corrupt(err: ParseStatusError) -> QueueError {
    QueueError::Internal(format!("corrupt row: {err}"))
}

// 23505 unique_violation: превращаем в доменный конфликт
fn on_unique_violation(err: sqlx::Error, conflict: QueueError) -> QueueError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => conflict,
        _ => QueueError::Database(err),
    }
}

/* ---------- строки таблиц ---------- */

const EVENT_COLUMNS: &str =
    "id, name, description, date, location, capacity, status, created_at, updated_at";

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    date: DateTime<Utc>,
    location: String,
    capacity: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = QueueError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            name: row.name,
            description: row.description,
            date: row.date,
            location: row.location,
            capacity: row.capacity,
            status: row.status.parse().map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SLOT_COLUMNS: &str =
    "id, event_id, start_time, end_time, max_capacity, current_count, status, created_at, updated_at";

#[derive(FromRow)]
struct TimeSlotRow {
    id: Uuid,
    event_id: Uuid,
    start_time: NaiveTime,
    end_time: NaiveTime,
    max_capacity: i32,
    current_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TimeSlotRow> for TimeSlot {
    type Error = QueueError;

    fn try_from(row: TimeSlotRow) -> Result<Self, Self::Error> {
        Ok(TimeSlot {
            id: row.id,
            event_id: row.event_id,
            start_time: row.start_time,
            end_time: row.end_time,
            max_capacity: row.max_capacity,
            current_count: row.current_count,
            status: row.status.parse().map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ENTRY_COLUMNS: &str = "id, event_id, time_slot_id, user_id, queue_number, original_queue_number, \
     status, estimated_wait_minutes, companion_role, companion_request_id, companion_label, \
     created_at, updated_at, called_at, entered_at";

#[derive(FromRow)]
struct QueueEntryRow {
    id: Uuid,
    event_id: Uuid,
    time_slot_id: Uuid,
    user_id: Uuid,
    queue_number: i32,
    original_queue_number: i32,
    status: String,
    estimated_wait_minutes: i32,
    companion_role: Option<String>,
    companion_request_id: Option<Uuid>,
    companion_label: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    called_at: Option<DateTime<Utc>>,
    entered_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = QueueError;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        let companion = match (row.companion_role, row.companion_request_id) {
            (Some(role), Some(request_id)) => Some(CompanionLink {
                role: role.parse().map_err(corrupt)?,
                request_id,
                display_label: row.companion_label,
            }),
            _ => None,
        };

        Ok(QueueEntry {
            id: row.id,
            event_id: row.event_id,
            time_slot_id: row.time_slot_id,
            user_id: row.user_id,
            queue_number: row.queue_number,
            original_queue_number: row.original_queue_number,
            status: row.status.parse().map_err(corrupt)?,
            estimated_wait_minutes: row.estimated_wait_minutes,
            companion,
            created_at: row.created_at,
            updated_at: row.updated_at,
            called_at: row.called_at,
            entered_at: row.entered_at,
        })
    }
}

const REQUEST_COLUMNS: &str = "id, user_id, queue_id, event_id, time_slot_id, original_queue_number, \
     offered_price, search_range, status, companion_id, linked_queue_number, created_at, matched_at";

#[derive(FromRow)]
struct CompanionRequestRow {
    id: Uuid,
    user_id: Uuid,
    queue_id: Uuid,
    event_id: Uuid,
    time_slot_id: Uuid,
    original_queue_number: i32,
    offered_price: i64,
    search_range: i32,
    status: String,
    companion_id: Option<Uuid>,
    linked_queue_number: Option<i32>,
    created_at: DateTime<Utc>,
    matched_at: Option<DateTime<Utc>>,
}

impl TryFrom<CompanionRequestRow> for CompanionRequest {
    type Error = QueueError;

    fn try_from(row: CompanionRequestRow) -> Result<Self, Self::Error> {
        Ok(CompanionRequest {
            id: row.id,
            user_id: row.user_id,
            queue_id: row.queue_id,
            event_id: row.event_id,
            time_slot_id: row.time_slot_id,
            original_queue_number: row.original_queue_number,
            offered_price: row.offered_price,
            search_range: row.search_range,
            status: row.status.parse().map_err(corrupt)?,
            companion_id: row.companion_id,
            linked_queue_number: row.linked_queue_number,
            created_at: row.created_at,
            matched_at: row.matched_at,
        })
    }
}

const COMPANION_COLUMNS: &str =
    "id, user_id, request_id, queue_id, original_queue_number, status, earned_amount, created_at";

#[derive(FromRow)]
struct CompanionRow {
    id: Uuid,
    user_id: Uuid,
    request_id: Uuid,
    queue_id: Uuid,
    original_queue_number: i32,
    status: String,
    earned_amount: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<CompanionRow> for Companion {
    type Error = QueueError;

    fn try_from(row: CompanionRow) -> Result<Self, Self::Error> {
        Ok(Companion {
            id: row.id,
            user_id: row.user_id,
            request_id: row.request_id,
            queue_id: row.queue_id,
            original_queue_number: row.original_queue_number,
            status: row.status.parse().map_err(corrupt)?,
            earned_amount: row.earned_amount,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> QueueResult<Vec<T>>
where
    T: TryFrom<R, Error = QueueError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn convert_opt<R, T>(row: Option<R>) -> QueueResult<Option<T>>
where
    T: TryFrom<R, Error = QueueError>,
{
    row.map(T::try_from).transpose()
}

#[async_trait]
impl StoreTx for PgTx {
    /* ---------- EVENTS ---------- */

    async fn event(&mut self, id: Uuid) -> QueueResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        convert_opt(row)
    }

    async fn list_events(&mut self) -> QueueResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY date"))
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn insert_event(&mut self, event: &Event) -> QueueResult<()> {
        sqlx::query(
            "INSERT INTO events (id, name, description, date, location, capacity, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.location)
        .bind(event.capacity)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_event(&mut self, event: &Event) -> QueueResult<()> {
        sqlx::query(
            "UPDATE events
             SET name = $2, description = $3, date = $4, location = $5, capacity = $6, status = $7, updated_at = $8
             WHERE id = $1"
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.location)
        .bind(event.capacity)
        .bind(event.status.as_str())
        .bind(event.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /* ---------- TIME SLOTS ---------- */

    async fn time_slot(&mut self, id: Uuid, lock: LockMode) -> QueueResult<Option<TimeSlot>> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM time_slots WHERE id = $1{}", lock_clause(lock));
        let row = sqlx::query_as::<_, TimeSlotRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        convert_opt(row)
    }

    async fn time_slots_for_event(&mut self, event_id: Uuid) -> QueueResult<Vec<TimeSlot>> {
        let rows = sqlx::query_as::<_, TimeSlotRow>(&format!(
            "SELECT {SLOT_COLUMNS} FROM time_slots WHERE event_id = $1 ORDER BY start_time"
        ))
        .bind(event_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_time_slot(&mut self, slot: &TimeSlot) -> QueueResult<()> {
        sqlx::query(
            "INSERT INTO time_slots (id, event_id, start_time, end_time, max_capacity, current_count, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        )
        .bind(slot.id)
        .bind(slot.event_id)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.max_capacity)
        .bind(slot.current_count)
        .bind(slot.status.as_str())
        .bind(slot.created_at)
        .bind(slot.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_time_slot(&mut self, slot: &TimeSlot) -> QueueResult<()> {
        sqlx::query(
            "UPDATE time_slots
             SET max_capacity = $2, current_count = $3, status = $4, updated_at = $5
             WHERE id = $1"
        )
        .bind(slot.id)
        .bind(slot.max_capacity)
        .bind(slot.current_count)
        .bind(slot.status.as_str())
        .bind(slot.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /* ---------- QUEUE ENTRIES ---------- */

    async fn queue_entry(&mut self, id: Uuid, lock: LockMode) -> QueueResult<Option<QueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE id = $1{}", lock_clause(lock));
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        convert_opt(row)
    }

    async fn active_entry_for_user(
        &mut self,
        event_id: Uuid,
        time_slot_id: Uuid,
        user_id: Uuid,
    ) -> QueueResult<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries
             WHERE event_id = $1 AND time_slot_id = $2 AND user_id = $3 AND status <> 'cancelled'
             FOR UPDATE"
        ))
        .bind(event_id)
        .bind(time_slot_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        convert_opt(row)
    }

    async fn max_queue_number(&mut self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Option<i32>> {
        let max = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(GREATEST(queue_number, original_queue_number))
             FROM queue_entries
             WHERE event_id = $1 AND time_slot_id = $2"
        )
        .bind(event_id)
        .bind(time_slot_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(max)
    }

    async fn next_waiting_entry(&mut self, time_slot_id: Uuid) -> QueueResult<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries
             WHERE time_slot_id = $1 AND status = 'waiting'
             ORDER BY queue_number, original_queue_number
             LIMIT 1
             FOR UPDATE"
        ))
        .bind(time_slot_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        convert_opt(row)
    }

    async fn entries_for_slot(&mut self, event_id: Uuid, time_slot_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries
             WHERE event_id = $1 AND time_slot_id = $2
             ORDER BY queue_number, original_queue_number"
        ))
        .bind(event_id)
        .bind(time_slot_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn entries_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_queue_entry(&mut self, entry: &QueueEntry) -> QueueResult<()> {
        let link = entry.companion.as_ref();
        sqlx::query(
            "INSERT INTO queue_entries (id, event_id, time_slot_id, user_id, queue_number, original_queue_number,
                 status, estimated_wait_minutes, companion_role, companion_request_id, companion_label,
                 created_at, updated_at, called_at, entered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        )
        .bind(entry.id)
        .bind(entry.event_id)
        .bind(entry.time_slot_id)
        .bind(entry.user_id)
        .bind(entry.queue_number)
        .bind(entry.original_queue_number)
        .bind(entry.status.as_str())
        .bind(entry.estimated_wait_minutes)
        .bind(link.map(|l| l.role.as_str()))
        .bind(link.map(|l| l.request_id))
        .bind(link.and_then(|l| l.display_label.clone()))
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.called_at)
        .bind(entry.entered_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| on_unique_violation(e, QueueError::DuplicateEntry))?;
        Ok(())
    }

    async fn update_queue_entry(&mut self, entry: &QueueEntry) -> QueueResult<()> {
        let link = entry.companion.as_ref();
        sqlx::query(
            "UPDATE queue_entries
             SET queue_number = $2, status = $3, estimated_wait_minutes = $4,
                 companion_role = $5, companion_request_id = $6, companion_label = $7,
                 updated_at = $8, called_at = $9, entered_at = $10
             WHERE id = $1"
        )
        .bind(entry.id)
        .bind(entry.queue_number)
        .bind(entry.status.as_str())
        .bind(entry.estimated_wait_minutes)
        .bind(link.map(|l| l.role.as_str()))
        .bind(link.map(|l| l.request_id))
        .bind(link.and_then(|l| l.display_label.clone()))
        .bind(entry.updated_at)
        .bind(entry.called_at)
        .bind(entry.entered_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /* ---------- COMPANION REQUESTS ---------- */

    async fn companion_request(&mut self, id: Uuid, lock: LockMode) -> QueueResult<Option<CompanionRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM companion_requests WHERE id = $1{}", lock_clause(lock));
        let row = sqlx::query_as::<_, CompanionRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        convert_opt(row)
    }

    async fn requests_for_queue(&mut self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Vec<CompanionRequest>> {
        let rows = sqlx::query_as::<_, CompanionRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM companion_requests
             WHERE user_id = $1 AND queue_id = $2
             ORDER BY created_at
             FOR UPDATE"
        ))
        .bind(user_id)
        .bind(queue_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn requests_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<CompanionRequest>> {
        let rows = sqlx::query_as::<_, CompanionRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM companion_requests WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn pending_requests(&mut self, time_slot_id: Option<Uuid>) -> QueueResult<Vec<CompanionRequest>> {
        let rows = sqlx::query_as::<_, CompanionRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM companion_requests
             WHERE status = 'pending' AND ($1::uuid IS NULL OR time_slot_id = $1)
             ORDER BY created_at"
        ))
        .bind(time_slot_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_companion_request(&mut self, request: &CompanionRequest) -> QueueResult<()> {
        sqlx::query(
            "INSERT INTO companion_requests (id, user_id, queue_id, event_id, time_slot_id, original_queue_number,
                 offered_price, search_range, status, companion_id, linked_queue_number, created_at, matched_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        )
        .bind(request.id)
        .bind(request.user_id)
        .bind(request.queue_id)
        .bind(request.event_id)
        .bind(request.time_slot_id)
        .bind(request.original_queue_number)
        .bind(request.offered_price)
        .bind(request.search_range)
        .bind(request.status.as_str())
        .bind(request.companion_id)
        .bind(request.linked_queue_number)
        .bind(request.created_at)
        .bind(request.matched_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| on_unique_violation(e, QueueError::DuplicateRequest))?;
        Ok(())
    }

    async fn update_companion_request(&mut self, request: &CompanionRequest) -> QueueResult<()> {
        sqlx::query(
            "UPDATE companion_requests
             SET offered_price = $2, search_range = $3, status = $4, companion_id = $5,
                 linked_queue_number = $6, matched_at = $7
             WHERE id = $1"
        )
        .bind(request.id)
        .bind(request.offered_price)
        .bind(request.search_range)
        .bind(request.status.as_str())
        .bind(request.companion_id)
        .bind(request.linked_queue_number)
        .bind(request.matched_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_companion_request(&mut self, id: Uuid) -> QueueResult<()> {
        sqlx::query("DELETE FROM companion_requests WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /* ---------- COMPANIONS ---------- */

    async fn companion_for_request(&mut self, request_id: Uuid) -> QueueResult<Option<Companion>> {
        let row = sqlx::query_as::<_, CompanionRow>(&format!(
            "SELECT {COMPANION_COLUMNS} FROM companions WHERE request_id = $1 FOR UPDATE"
        ))
        .bind(request_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        convert_opt(row)
    }

    async fn companion_for_queue(&mut self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Option<Companion>> {
        let row = sqlx::query_as::<_, CompanionRow>(&format!(
            "SELECT {COMPANION_COLUMNS} FROM companions WHERE user_id = $1 AND queue_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(queue_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        convert_opt(row)
    }

    async fn companions_for_user(&mut self, user_id: Uuid) -> QueueResult<Vec<Companion>> {
        let rows = sqlx::query_as::<_, CompanionRow>(&format!(
            "SELECT {COMPANION_COLUMNS} FROM companions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_companion(&mut self, companion: &Companion) -> QueueResult<()> {
        sqlx::query(
            "INSERT INTO companions (id, user_id, request_id, queue_id, original_queue_number, status, earned_amount, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        )
        .bind(companion.id)
        .bind(companion.user_id)
        .bind(companion.request_id)
        .bind(companion.queue_id)
        .bind(companion.original_queue_number)
        .bind(companion.status.as_str())
        .bind(companion.earned_amount)
        .bind(companion.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| on_unique_violation(e, QueueError::AlreadyProcessed))?;
        Ok(())
    }

    async fn update_companion(&mut self, companion: &Companion) -> QueueResult<()> {
        sqlx::query("UPDATE companions SET status = $2 WHERE id = $1")
            .bind(companion.id)
            .bind(companion.status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_companion(&mut self, id: Uuid) -> QueueResult<()> {
        sqlx::query("DELETE FROM companions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> QueueResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

//! error.rs
//!
//! Единый тип ошибок ядра очереди. Каждая ошибка относится к одному из классов
//! (`ErrorKind`), по которому клиент понимает, что делать дальше: исправить
//! запрос, обновить экран или повторить попытку позже.

use uuid::Uuid;

/// Класс ошибки, видимый вызывающей стороне.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Некорректный ввод, исправить и повторить.
    Validation,
    /// Операция уже выполнена кем-то другим или противоречит состоянию.
    Conflict,
    NotFound,
    Permission,
    /// Конкуренция транзакций или недоступность хранилища, можно повторить.
    Transient,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("time slot {0} not found")]
    SlotNotFound(Uuid),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("user already has an active entry in this time slot")]
    DuplicateEntry,

    #[error("time slot is full or not accepting entries")]
    SlotFull,

    #[error("queue entry is already cancelled")]
    AlreadyCancelled,

    #[error("companion request was already processed")]
    AlreadyProcessed,

    #[error("an open companion request already exists for this queue entry")]
    DuplicateRequest,

    #[error("requester and companion are in different time slots")]
    CrossSlotMatch,

    #[error("no active companion relationship to withdraw")]
    NothingToWithdraw,

    #[error("event is not accepting entries")]
    EventClosed,

    #[error("ticket is not verified")]
    TicketNotVerified,

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("store temporarily unavailable: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        QueueError::NotFound { entity, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Validation(_) => ErrorKind::Validation,
            QueueError::NotFound { .. } | QueueError::SlotNotFound(_) => ErrorKind::NotFound,
            QueueError::Permission(_) | QueueError::TicketNotVerified => ErrorKind::Permission,
            QueueError::DuplicateEntry
            | QueueError::SlotFull
            | QueueError::AlreadyCancelled
            | QueueError::AlreadyProcessed
            | QueueError::DuplicateRequest
            | QueueError::CrossSlotMatch
            | QueueError::NothingToWithdraw
            | QueueError::EventClosed
            | QueueError::InvalidState(_) => ErrorKind::Conflict,
            QueueError::Transient(_) => ErrorKind::Transient,
            QueueError::Database(e) if is_transient_db_error(e) => ErrorKind::Transient,
            QueueError::Database(_) | QueueError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Машиночитаемый код для ответа API.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Validation(_) => "VALIDATION_ERROR",
            QueueError::NotFound { .. } => "NOT_FOUND",
            QueueError::SlotNotFound(_) => "SLOT_NOT_FOUND",
            QueueError::Permission(_) => "PERMISSION_DENIED",
            QueueError::DuplicateEntry => "DUPLICATE_ENTRY",
            QueueError::SlotFull => "SLOT_FULL",
            QueueError::AlreadyCancelled => "ALREADY_CANCELLED",
            QueueError::AlreadyProcessed => "ALREADY_PROCESSED",
            QueueError::DuplicateRequest => "DUPLICATE_REQUEST",
            QueueError::CrossSlotMatch => "CROSS_SLOT_MATCH",
            QueueError::NothingToWithdraw => "NOTHING_TO_WITHDRAW",
            QueueError::EventClosed => "EVENT_CLOSED",
            QueueError::TicketNotVerified => "TICKET_NOT_VERIFIED",
            QueueError::InvalidState(_) => "INVALID_STATE",
            QueueError::Transient(_) => "TRANSIENT",
            QueueError::Database(e) if is_transient_db_error(e) => "TRANSIENT",
            QueueError::Database(_) | QueueError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for QueueError {
    fn from(errors: validator::ValidationErrors) -> Self {
        QueueError::Validation(errors.to_string())
    }
}

// 40001 serialization_failure, 40P01 deadlock_detected
fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_classified_as_conflict() {
        for err in [
            QueueError::DuplicateEntry,
            QueueError::SlotFull,
            QueueError::AlreadyCancelled,
            QueueError::AlreadyProcessed,
            QueueError::CrossSlotMatch,
        ] {
            assert_eq!(err.kind(), ErrorKind::Conflict, "{err}");
        }
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err = QueueError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert_eq!(err.code(), "TRANSIENT");
    }

    #[test]
    fn row_not_found_is_internal() {
        let err = QueueError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}

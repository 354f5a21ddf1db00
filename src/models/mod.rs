pub mod user;
pub mod event;
pub mod time_slot;
pub mod queue_entry;
pub mod companion;

pub use user::User;
pub use event::{Event, EventStatus};
pub use time_slot::{SlotStatus, TimeSlot, TimeSlotSummary};
pub use queue_entry::{CompanionLink, CompanionRole, QueueEntry, QueueStatus, QueueSummary, COMPANION_LABEL};
pub use companion::{Companion, CompanionRequest, CompanionStatus, RequestStatus};

/// Ошибка разбора строкового статуса из хранилища.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseStatusError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

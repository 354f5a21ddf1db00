use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::ParseStatusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    Entered,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Called => "called",
            QueueStatus::Entered => "entered",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Waiting | QueueStatus::Called)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(QueueStatus::Waiting),
            "called" => Ok(QueueStatus::Called),
            "entered" => Ok(QueueStatus::Entered),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(ParseStatusError::new("queue status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionRole {
    Requester,
    Companion,
}

impl CompanionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanionRole::Requester => "requester",
            CompanionRole::Companion => "companion",
        }
    }
}

impl FromStr for CompanionRole {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requester" => Ok(CompanionRole::Requester),
            "companion" => Ok(CompanionRole::Companion),
            other => Err(ParseStatusError::new("companion role", other)),
        }
    }
}

/// Метка, которую видит компаньон рядом со своим номером.
pub const COMPANION_LABEL: &str = "(동행자)";

/// Связь записи очереди с сопровождением. Присутствует только пока
/// действует совпадение.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionLink {
    pub role: CompanionRole,
    pub request_id: Uuid,
    pub display_label: Option<String>,
}

impl CompanionLink {
    pub fn requester(request_id: Uuid) -> Self {
        Self { role: CompanionRole::Requester, request_id, display_label: None }
    }

    pub fn companion(request_id: Uuid) -> Self {
        Self {
            role: CompanionRole::Companion,
            request_id,
            display_label: Some(COMPANION_LABEL.to_string()),
        }
    }
}

/// Запись в очереди слота.
///
/// `original_queue_number` выдаётся при входе и больше не меняется;
/// `queue_number` используется для отображения и порядка вызова и
/// перезаписывается при связывании с компаньоном.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub time_slot_id: Uuid,
    pub user_id: Uuid,
    pub queue_number: i32,
    pub original_queue_number: i32,
    pub status: QueueStatus,
    pub estimated_wait_minutes: i32,
    pub companion: Option<CompanionLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub entered_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn is_companion_service(&self) -> bool {
        self.companion.is_some()
    }

    pub fn link(&mut self, linked_number: i32, link: CompanionLink, now: DateTime<Utc>) {
        self.queue_number = linked_number;
        self.companion = Some(link);
        self.updated_at = now;
    }

    /// Снимает связь и возвращает исходный номер.
    pub fn unlink(&mut self, now: DateTime<Utc>) {
        self.queue_number = self.original_queue_number;
        self.companion = None;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub event_id: Uuid,
    pub time_slot_id: Uuid,
    pub total_count: i64,
    pub waiting_count: i64,
    pub called_count: i64,
    pub entered_count: i64,
    pub estimated_wait_minutes: i64,
}

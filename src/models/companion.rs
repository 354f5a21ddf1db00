use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::ParseStatusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Matched,
    Cancelled,
    WithdrawnByCompanion,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Matched => "matched",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::WithdrawnByCompanion => "withdrawn_by_companion",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Matched)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "matched" => Ok(RequestStatus::Matched),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "withdrawn_by_companion" => Ok(RequestStatus::WithdrawnByCompanion),
            other => Err(ParseStatusError::new("request status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionStatus {
    Waiting,
    Active,
}

impl CompanionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanionStatus::Waiting => "waiting",
            CompanionStatus::Active => "active",
        }
    }
}

impl FromStr for CompanionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(CompanionStatus::Waiting),
            "active" => Ok(CompanionStatus::Active),
            other => Err(ParseStatusError::new("companion status", other)),
        }
    }
}

/// Запрос на сопровождение от владельца записи очереди.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub queue_id: Uuid,
    pub event_id: Uuid,
    pub time_slot_id: Uuid,
    pub original_queue_number: i32,
    pub offered_price: i64,
    pub search_range: i32,
    pub status: RequestStatus,
    pub companion_id: Option<Uuid>,
    pub linked_queue_number: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
}

impl CompanionRequest {
    /// Окно поиска кандидатов: `[max(1, n - range), n + range]`.
    pub fn search_window(&self) -> (i32, i32) {
        let lo = (self.original_queue_number - self.search_range).max(1);
        (lo, self.original_queue_number + self.search_range)
    }

    pub fn window_contains(&self, queue_number: i32) -> bool {
        let (lo, hi) = self.search_window();
        (lo..=hi).contains(&queue_number)
    }
}

/// Пользователь, принявший запрос.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Companion {
    pub id: Uuid,
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub queue_id: Uuid,
    pub original_queue_number: i32,
    pub status: CompanionStatus,
    pub earned_amount: i64,
    pub created_at: DateTime<Utc>,
}

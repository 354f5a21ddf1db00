use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::ParseStatusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Full,
    Closed,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Full => "full",
            SlotStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SlotStatus::Available),
            "full" => Ok(SlotStatus::Full),
            "closed" => Ok(SlotStatus::Closed),
            other => Err(ParseStatusError::new("slot status", other)),
        }
    }
}

/// Временной слот события. `current_count` и `status` принадлежат
/// учёту вместимости и меняются только внутри транзакций очереди.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub event_id: Uuid,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_capacity: i32,
    pub current_count: i32,
    pub status: SlotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeSlot {
    pub fn available_capacity(&self) -> i32 {
        (self.max_capacity - self.current_count).max(0)
    }

    pub fn is_full(&self) -> bool {
        self.current_count >= self.max_capacity
    }

    pub fn summary(&self) -> TimeSlotSummary {
        TimeSlotSummary {
            time_slot_id: self.id,
            current_count: self.current_count,
            max_capacity: self.max_capacity,
            available_count: self.available_capacity(),
            is_full: self.is_full(),
            is_closed: self.status == SlotStatus::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotSummary {
    pub time_slot_id: Uuid,
    pub current_count: i32,
    pub max_capacity: i32,
    pub available_count: i32,
    pub is_full: bool,
    pub is_closed: bool,
}

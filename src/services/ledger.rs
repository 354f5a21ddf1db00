//! ledger.rs
//!
//! Учёт вместимости временного слота: `current_count` против `max_capacity`.
//! Функции работают только внутри уже открытой транзакции, отдельного
//! вызова без транзакции нет: иначе получится гонка потерянного обновления.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::models::{SlotStatus, TimeSlot};
use crate::store::{LockMode, StoreTx};

/// Занимает одно место. `SlotFull`, если слот заполнен или не `available`.
pub fn reserve(slot: &mut TimeSlot, now: DateTime<Utc>) -> QueueResult<()> {
    if slot.status != SlotStatus::Available || slot.current_count >= slot.max_capacity {
        return Err(QueueError::SlotFull);
    }
    slot.current_count += 1;
    if slot.current_count == slot.max_capacity {
        slot.status = SlotStatus::Full;
    }
    slot.updated_at = now;
    Ok(())
}

/// Освобождает одно место, не опускаясь ниже нуля.
pub fn release(slot: &mut TimeSlot, now: DateTime<Utc>) {
    slot.current_count = (slot.current_count - 1).max(0);
    if slot.status == SlotStatus::Full && slot.current_count < slot.max_capacity {
        slot.status = SlotStatus::Available;
    }
    slot.updated_at = now;
}

/// Меняет максимальную вместимость. Ниже текущего счётчика нельзя.
pub fn resize(slot: &mut TimeSlot, max_capacity: i32, now: DateTime<Utc>) -> QueueResult<()> {
    if max_capacity < 1 {
        return Err(QueueError::Validation("max_capacity must be at least 1".to_string()));
    }
    if max_capacity < slot.current_count {
        return Err(QueueError::Validation(format!(
            "max_capacity {} is below current count {}",
            max_capacity, slot.current_count
        )));
    }
    slot.max_capacity = max_capacity;
    if slot.status != SlotStatus::Closed {
        slot.status = derived_status(slot);
    }
    slot.updated_at = now;
    Ok(())
}

/// Закрывает слот или открывает его обратно со статусом по счётчику.
pub fn set_closed(slot: &mut TimeSlot, closed: bool, now: DateTime<Utc>) {
    slot.status = if closed { SlotStatus::Closed } else { derived_status(slot) };
    slot.updated_at = now;
}

fn derived_status(slot: &TimeSlot) -> SlotStatus {
    if slot.current_count >= slot.max_capacity {
        SlotStatus::Full
    } else {
        SlotStatus::Available
    }
}

async fn load_locked(tx: &mut dyn StoreTx, time_slot_id: Uuid) -> QueueResult<TimeSlot> {
    tx.time_slot(time_slot_id, LockMode::ForUpdate)
        .await?
        .ok_or(QueueError::SlotNotFound(time_slot_id))
}

/// Занимает место в рамках транзакции вызывающего.
pub async fn try_reserve(tx: &mut dyn StoreTx, time_slot_id: Uuid, now: DateTime<Utc>) -> QueueResult<TimeSlot> {
    let mut slot = load_locked(tx, time_slot_id).await?;
    reserve(&mut slot, now)?;
    tx.update_time_slot(&slot).await?;
    Ok(slot)
}

/// Освобождает место в рамках транзакции вызывающего.
pub async fn release_in(tx: &mut dyn StoreTx, time_slot_id: Uuid, now: DateTime<Utc>) -> QueueResult<TimeSlot> {
    let mut slot = load_locked(tx, time_slot_id).await?;
    release(&mut slot, now);
    tx.update_time_slot(&slot).await?;
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn slot(max_capacity: i32, current_count: i32) -> TimeSlot {
        let now = Utc::now();
        TimeSlot {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            max_capacity,
            current_count,
            status: SlotStatus::Available,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reserve_flips_to_full_at_capacity() {
        let mut s = slot(2, 0);
        reserve(&mut s, Utc::now()).unwrap();
        assert_eq!((s.current_count, s.status), (1, SlotStatus::Available));
        reserve(&mut s, Utc::now()).unwrap();
        assert_eq!((s.current_count, s.status), (2, SlotStatus::Full));
        assert!(matches!(reserve(&mut s, Utc::now()), Err(QueueError::SlotFull)));
        assert_eq!(s.current_count, 2);
    }

    #[test]
    fn reserve_rejects_closed_slot() {
        let mut s = slot(5, 0);
        s.status = SlotStatus::Closed;
        assert!(matches!(reserve(&mut s, Utc::now()), Err(QueueError::SlotFull)));
        assert_eq!(s.current_count, 0);
    }

    #[test]
    fn release_reopens_full_slot_and_floors_at_zero() {
        let mut s = slot(1, 1);
        s.status = SlotStatus::Full;
        release(&mut s, Utc::now());
        assert_eq!((s.current_count, s.status), (0, SlotStatus::Available));
        release(&mut s, Utc::now());
        assert_eq!(s.current_count, 0);
    }

    #[test]
    fn release_keeps_closed_slot_closed() {
        let mut s = slot(3, 2);
        s.status = SlotStatus::Closed;
        release(&mut s, Utc::now());
        assert_eq!((s.current_count, s.status), (1, SlotStatus::Closed));
    }

    #[test]
    fn resize_below_count_is_rejected() {
        let mut s = slot(5, 4);
        assert!(matches!(resize(&mut s, 3, Utc::now()), Err(QueueError::Validation(_))));
        resize(&mut s, 4, Utc::now()).unwrap();
        assert_eq!(s.status, SlotStatus::Full);
        resize(&mut s, 10, Utc::now()).unwrap();
        assert_eq!(s.status, SlotStatus::Available);
    }

    #[test]
    fn reopening_derives_status_from_count() {
        let mut s = slot(2, 2);
        set_closed(&mut s, true, Utc::now());
        assert_eq!(s.status, SlotStatus::Closed);
        set_closed(&mut s, false, Utc::now());
        assert_eq!(s.status, SlotStatus::Full);
    }
}

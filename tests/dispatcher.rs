mod common;

use uuid::Uuid;

use common::Harness;
use queue_system::error::QueueError;
use queue_system::models::{CompanionStatus, QueueStatus, SlotStatus};
use queue_system::services::notifier::NotificationKind;

#[tokio::test]
async fn empty_queue_calls_nobody() {
    let h = Harness::new();
    let slot = h.slot(3).await;

    assert!(h.core.dispatcher.call_next(slot.id).await.unwrap().is_none());

    let state = h.slot_state(slot.id).await;
    assert_eq!(state.current_count, 0);
    assert_eq!(state.updated_at, slot.updated_at);
}

#[tokio::test]
async fn unknown_slot_is_reported() {
    let h = Harness::new();
    let result = h.core.dispatcher.call_next(Uuid::new_v4()).await;
    assert!(matches!(result, Err(QueueError::SlotNotFound(_))));
}

#[tokio::test]
async fn calls_in_queue_number_order_and_frees_capacity() {
    let h = Harness::new();
    let slot = h.slot(3).await;
    let entries = h.join_many(&slot, 3).await;
    assert_eq!(h.slot_state(slot.id).await.status, SlotStatus::Full);

    let first = h.core.dispatcher.call_next(slot.id).await.unwrap().unwrap();
    assert_eq!(first.id, entries[0].id);
    assert_eq!(first.status, QueueStatus::Called);
    assert!(first.called_at.is_some());

    let state = h.slot_state(slot.id).await;
    assert_eq!((state.current_count, state.status), (2, SlotStatus::Available));

    let second = h.core.dispatcher.call_next(slot.id).await.unwrap().unwrap();
    assert_eq!(second.id, entries[1].id);
    assert_eq!(h.notifier.sent_to(second.user_id).last(), Some(&NotificationKind::QueueCalled));
}

#[tokio::test]
async fn linked_pair_is_called_at_the_linked_number() {
    let h = Harness::new();
    let slot = h.slot(5).await;
    let entries = h.join_many(&slot, 3).await;
    let (r, k) = (&entries[0], &entries[2]);

    let request = h.core.matching.create_request(r.user_id, r.id, None, 15_000).await.unwrap();
    h.core.matching.accept(request.id, k.user_id, k.id, None).await.unwrap();

    let mut order = Vec::new();
    while let Some(called) = h.core.dispatcher.call_next(slot.id).await.unwrap() {
        order.push(called.id);
    }
    assert_eq!(order, vec![entries[1].id, r.id, k.id]);

    let companion = &h.core.matching.user_companions(k.user_id).await.unwrap()[0];
    assert_eq!(companion.status, CompanionStatus::Active);
    assert_eq!(h.slot_state(slot.id).await.current_count, 0);
}

#[tokio::test]
async fn entering_requires_a_called_entry() {
    let h = Harness::new();
    let slot = h.slot(5).await;
    let entries = h.join_many(&slot, 2).await;

    let waiting = h.core.dispatcher.mark_entered(entries[0].id).await;
    assert!(matches!(waiting, Err(QueueError::InvalidState(_))));

    h.core.dispatcher.call_next(slot.id).await.unwrap();
    let entered = h.core.dispatcher.mark_entered(entries[0].id).await.unwrap();
    assert_eq!(entered.status, QueueStatus::Entered);
    assert!(entered.entered_at.is_some());

    let again = h.core.dispatcher.mark_entered(entries[0].id).await;
    assert!(matches!(again, Err(QueueError::InvalidState(_))));

    let cancel_entered = h.core.admission.cancel_queue(entries[0].id, entries[0].user_id).await;
    assert!(matches!(cancel_entered, Err(QueueError::InvalidState(_))));

    h.core.admission.cancel_queue(entries[1].id, entries[1].user_id).await.unwrap();
    let cancelled = h.core.dispatcher.mark_entered(entries[1].id).await;
    assert!(matches!(cancelled, Err(QueueError::AlreadyCancelled)));
}

#[tokio::test]
async fn cancelling_a_called_entry_does_not_release_twice() {
    let h = Harness::new();
    let slot = h.slot(2).await;
    let entries = h.join_many(&slot, 2).await;

    h.core.dispatcher.call_next(slot.id).await.unwrap();
    assert_eq!(h.slot_state(slot.id).await.current_count, 1);

    h.core.admission.cancel_queue(entries[0].id, entries[0].user_id).await.unwrap();
    assert_eq!(h.slot_state(slot.id).await.current_count, 1);
}

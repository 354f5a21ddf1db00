//! matching.rs
//!
//! Жизненный цикл запросов на сопровождение:
//! pending -> matched | cancelled, matched -> cancelled | withdrawn_by_companion.
//!
//! Совпадение создаётся одной транзакцией: запись компаньона, перевод
//! запроса в `matched` и перенумерация обеих записей очереди либо
//! происходят вместе, либо не происходят вовсе. Второй принявший получает
//! `AlreadyProcessed`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::notifier::NotificationKind;
use super::retry::with_retry;
use super::CoreContext;
use crate::config::QueuePolicy;
use crate::error::{QueueError, QueueResult};
use crate::models::{
    Companion, CompanionLink, CompanionRequest, CompanionRole, CompanionStatus, QueueEntry, QueueStatus,
    RequestStatus,
};
use crate::store::{LockMode, StoreTx};

/// Диапазон поиска через `now - created_at`: растёт на шаг каждую
/// полную минуту и упирается в максимум.
pub fn search_range_at(policy: &QueuePolicy, created_at: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    let elapsed_minutes = (now - created_at).num_minutes().max(0);
    let grown = i64::from(policy.initial_search_range) + elapsed_minutes * i64::from(policy.search_range_step);
    grown.min(i64::from(policy.max_search_range)) as i32
}

/// Штраф за отказ от сопровождения, с округлением вниз.
pub fn withdrawal_fee(policy: &QueuePolicy, offered_price: i64) -> i64 {
    let fee = i128::from(offered_price.max(0)) * i128::from(policy.withdrawal_fee_percent) / 100;
    i64::try_from(fee).unwrap_or(i64::MAX)
}

/// Результат отказа от сопровождения.
#[derive(Debug, Clone, Serialize)]
pub struct Withdrawal {
    pub request_id: Uuid,
    pub role: CompanionRole,
    pub fee: i64,
}

pub(crate) struct Dissolved {
    pub request: CompanionRequest,
    pub companion: Option<Companion>,
}

/// Разрывает действующее совпадение внутри транзакции вызывающего:
/// удаляет компаньона, возвращает обеим записям исходные номера.
/// Вызывающий уже держит блокировку слота и запроса.
pub(crate) async fn dissolve_match(
    tx: &mut dyn StoreTx,
    mut request: CompanionRequest,
    withdrawing: CompanionRole,
    now: DateTime<Utc>,
) -> QueueResult<Dissolved> {
    if request.status != RequestStatus::Matched {
        return Err(QueueError::NothingToWithdraw);
    }

    let companion = tx.companion_for_request(request.id).await?;
    let mut linked_queues = vec![request.queue_id];
    if let Some(companion) = &companion {
        linked_queues.push(companion.queue_id);
        tx.delete_companion(companion.id).await?;
    }

    for queue_id in linked_queues {
        if let Some(mut entry) = tx.queue_entry(queue_id, LockMode::ForUpdate).await? {
            if entry.companion.as_ref().map(|l| l.request_id) == Some(request.id) {
                entry.unlink(now);
                tx.update_queue_entry(&entry).await?;
            }
        }
    }

    match withdrawing {
        CompanionRole::Companion => {
            request.status = RequestStatus::WithdrawnByCompanion;
            request.companion_id = None;
            request.linked_queue_number = None;
        }
        CompanionRole::Requester => {
            request.status = RequestStatus::Cancelled;
        }
    }
    tx.update_companion_request(&request).await?;

    Ok(Dissolved { request, companion })
}

#[derive(Clone)]
pub struct MatchingEngine {
    ctx: CoreContext,
}

impl MatchingEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    fn check_price(&self, offered_price: i64) -> QueueResult<()> {
        let policy = &self.ctx.policy;
        if offered_price < policy.min_offered_price {
            return Err(QueueError::Validation(format!(
                "offered price must be at least {}",
                policy.min_offered_price
            )));
        }
        if offered_price > policy.max_offered_price {
            return Err(QueueError::Validation(format!(
                "offered price must be at most {}",
                policy.max_offered_price
            )));
        }
        Ok(())
    }

    /// Создаёт запрос на сопровождение для ожидающей записи.
    /// `original_queue_number`, если передан, должен совпасть с записью.
    pub async fn create_request(
        &self,
        user_id: Uuid,
        queue_id: Uuid,
        original_queue_number: Option<i32>,
        offered_price: i64,
    ) -> QueueResult<CompanionRequest> {
        self.check_price(offered_price)?;

        let request = with_retry(self.ctx.retry, "create_companion_request", move || {
            self.try_create(user_id, queue_id, original_queue_number, offered_price)
        })
        .await?;

        info!(
            request_id = %request.id,
            %user_id,
            queue_number = request.original_queue_number,
            offered_price,
            "companion request created"
        );
        Ok(request)
    }

    async fn try_create(
        &self,
        user_id: Uuid,
        queue_id: Uuid,
        original_queue_number: Option<i32>,
        offered_price: i64,
    ) -> QueueResult<CompanionRequest> {
        let now = Utc::now();
        let mut tx = self.ctx.store.begin().await?;

        let entry = owned_entry(tx.as_mut(), queue_id, user_id, LockMode::ForUpdate).await?;
        if entry.status != QueueStatus::Waiting {
            return Err(QueueError::InvalidState(format!(
                "companion requests need a waiting entry, entry is {}",
                entry.status
            )));
        }
        if original_queue_number.is_some_and(|n| n != entry.original_queue_number) {
            return Err(QueueError::Validation("queue number does not match the entry".to_string()));
        }

        for existing in tx.requests_for_queue(user_id, queue_id).await? {
            match existing.status {
                RequestStatus::WithdrawnByCompanion => tx.delete_companion_request(existing.id).await?,
                status if status.is_open() => return Err(QueueError::DuplicateRequest),
                _ => {}
            }
        }
        if entry.is_companion_service() {
            return Err(QueueError::InvalidState("entry is already linked to a companion".to_string()));
        }

        let request = CompanionRequest {
            id: Uuid::new_v4(),
            user_id,
            queue_id,
            event_id: entry.event_id,
            time_slot_id: entry.time_slot_id,
            original_queue_number: entry.original_queue_number,
            offered_price,
            search_range: self.ctx.policy.initial_search_range,
            status: RequestStatus::Pending,
            companion_id: None,
            linked_queue_number: None,
            created_at: now,
            matched_at: None,
        };
        tx.insert_companion_request(&request).await?;
        tx.commit().await?;
        Ok(request)
    }

    pub async fn expand_search_range(&self, request_id: Uuid) -> QueueResult<CompanionRequest> {
        self.expand_search_range_at(request_id, Utc::now()).await
    }

    /// Расширяет диапазон поиска по прошедшему времени. Диапазон только
    /// растёт; для не-pending запросов ничего не меняется.
    pub async fn expand_search_range_at(&self, request_id: Uuid, now: DateTime<Utc>) -> QueueResult<CompanionRequest> {
        with_retry(self.ctx.retry, "expand_search_range", move || async move {
            let mut tx = self.ctx.store.begin().await?;
            let mut request = tx
                .companion_request(request_id, LockMode::ForUpdate)
                .await?
                .ok_or_else(|| QueueError::not_found("companion request", request_id))?;
            if request.status != RequestStatus::Pending {
                return Ok(request);
            }

            let range = search_range_at(&self.ctx.policy, request.created_at, now);
            if range > request.search_range {
                request.search_range = range;
                tx.update_companion_request(&request).await?;
                tx.commit().await?;
            }
            Ok(request)
        })
        .await
    }

    /// Один проход расширения по всем pending-запросам.
    /// Возвращает число запросов, у которых диапазон вырос.
    pub async fn expand_all_pending(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let pending = {
            let mut tx = self.ctx.store.begin().await?;
            let pending = tx.pending_requests(None).await?;
            pending
        };

        let mut expanded = 0;
        for request in pending {
            match self.expand_search_range_at(request.id, now).await {
                Ok(updated) if updated.search_range > request.search_range => expanded += 1,
                Ok(_) => {}
                Err(e) => warn!(request_id = %request.id, error = %e, "search range expansion failed"),
            }
        }
        Ok(expanded)
    }

    /// Принимает запрос. Всё совпадение фиксируется одной транзакцией.
    pub async fn accept(
        &self,
        request_id: Uuid,
        companion_user_id: Uuid,
        companion_queue_id: Uuid,
        companion_original_number: Option<i32>,
    ) -> QueueResult<CompanionRequest> {
        let (request, companion) = with_retry(self.ctx.retry, "accept_companion_request", move || {
            self.try_accept(request_id, companion_user_id, companion_queue_id, companion_original_number)
        })
        .await?;

        info!(
            %request_id,
            requester = %request.user_id,
            companion = %companion_user_id,
            linked_queue_number = ?request.linked_queue_number,
            "companion request matched"
        );

        let payload = json!({
            "request_id": request.id,
            "companion_id": companion.id,
            "linked_queue_number": request.linked_queue_number,
            "offered_price": request.offered_price,
        });
        self.ctx.notify(request.user_id, NotificationKind::CompanionMatched, payload.clone()).await;
        self.ctx.notify(companion_user_id, NotificationKind::CompanionMatched, payload).await;
        Ok(request)
    }

    async fn try_accept(
        &self,
        request_id: Uuid,
        companion_user_id: Uuid,
        companion_queue_id: Uuid,
        companion_original_number: Option<i32>,
    ) -> QueueResult<(CompanionRequest, Companion)> {
        let now = Utc::now();
        let mut tx = self.ctx.store.begin().await?;

        let time_slot_id = tx
            .companion_request(request_id, LockMode::Read)
            .await?
            .ok_or_else(|| QueueError::not_found("companion request", request_id))?
            .time_slot_id;
        tx.time_slot(time_slot_id, LockMode::ForUpdate).await?;

        let mut request = tx
            .companion_request(request_id, LockMode::ForUpdate)
            .await?
            .ok_or_else(|| QueueError::not_found("companion request", request_id))?;
        if request.status != RequestStatus::Pending {
            return Err(QueueError::AlreadyProcessed);
        }
        if request.user_id == companion_user_id {
            return Err(QueueError::Validation("cannot accept your own companion request".to_string()));
        }

        let mut requester_entry = tx
            .queue_entry(request.queue_id, LockMode::ForUpdate)
            .await?
            .ok_or_else(|| QueueError::not_found("queue entry", request.queue_id))?;
        let mut companion_entry = tx
            .queue_entry(companion_queue_id, LockMode::ForUpdate)
            .await?
            .ok_or_else(|| QueueError::not_found("queue entry", companion_queue_id))?;

        if companion_entry.user_id != companion_user_id {
            return Err(QueueError::Permission("queue entry belongs to another user".to_string()));
        }
        if (companion_entry.event_id, companion_entry.time_slot_id) != (request.event_id, request.time_slot_id) {
            return Err(QueueError::CrossSlotMatch);
        }
        ensure_linkable(&requester_entry, "requester")?;
        ensure_linkable(&companion_entry, "companion")?;
        if companion_original_number.is_some_and(|n| n != companion_entry.original_queue_number) {
            return Err(QueueError::Validation("queue number does not match the entry".to_string()));
        }

        // оба встают на больший из двух номеров
        let linked_number = request.original_queue_number.max(companion_entry.original_queue_number);

        let companion = Companion {
            id: Uuid::new_v4(),
            user_id: companion_user_id,
            request_id,
            queue_id: companion_queue_id,
            original_queue_number: companion_entry.original_queue_number,
            status: CompanionStatus::Waiting,
            earned_amount: request.offered_price,
            created_at: now,
        };
        tx.insert_companion(&companion).await?;

        request.status = RequestStatus::Matched;
        request.companion_id = Some(companion.id);
        request.linked_queue_number = Some(linked_number);
        request.matched_at = Some(now);
        tx.update_companion_request(&request).await?;

        requester_entry.link(linked_number, CompanionLink::requester(request_id), now);
        companion_entry.link(linked_number, CompanionLink::companion(request_id), now);
        tx.update_queue_entry(&requester_entry).await?;
        tx.update_queue_entry(&companion_entry).await?;

        // свои pending-запросы компаньона теряют смысл
        for mut own in tx.requests_for_queue(companion_user_id, companion_queue_id).await? {
            if own.status == RequestStatus::Pending {
                own.status = RequestStatus::Cancelled;
                tx.update_companion_request(&own).await?;
            }
        }

        tx.commit().await?;
        Ok((request, companion))
    }

    /// Отказ от сопровождения со стороны любого участника, по записи очереди.
    pub async fn withdraw(&self, user_id: Uuid, queue_id: Uuid) -> QueueResult<Withdrawal> {
        let (withdrawal, dissolved) = with_retry(self.ctx.retry, "withdraw_companion_service", move || {
            self.try_withdraw(user_id, queue_id)
        })
        .await?;

        info!(
            request_id = %withdrawal.request_id,
            %user_id,
            role = withdrawal.role.as_str(),
            fee = withdrawal.fee,
            "companion service withdrawn"
        );

        let counterparty = match withdrawal.role {
            CompanionRole::Companion => Some(dissolved.request.user_id),
            CompanionRole::Requester => dissolved.companion.as_ref().map(|c| c.user_id),
        };
        if let Some(counterparty) = counterparty {
            self.ctx
                .notify(
                    counterparty,
                    NotificationKind::CompanionWithdrawn,
                    json!({
                        "request_id": withdrawal.request_id,
                        "withdrawn_by": withdrawal.role.as_str(),
                    }),
                )
                .await;
        }
        Ok(withdrawal)
    }

    /// То же самое, но по идентификатору запроса: роль определяется по
    /// тому, кто вызывает.
    pub async fn withdraw_by_request(&self, request_id: Uuid, user_id: Uuid) -> QueueResult<Withdrawal> {
        let queue_id = {
            let mut tx = self.ctx.store.begin().await?;
            let request = tx
                .companion_request(request_id, LockMode::Read)
                .await?
                .ok_or_else(|| QueueError::not_found("companion request", request_id))?;
            if request.user_id == user_id {
                request.queue_id
            } else {
                let companion = tx.companion_for_request(request_id).await?;
                match companion {
                    Some(companion) if companion.user_id == user_id => companion.queue_id,
                    Some(_) => {
                        return Err(QueueError::Permission("not a participant of this request".to_string()))
                    }
                    None => return Err(QueueError::NothingToWithdraw),
                }
            }
        };
        self.withdraw(user_id, queue_id).await
    }

    async fn try_withdraw(&self, user_id: Uuid, queue_id: Uuid) -> QueueResult<(Withdrawal, Dissolved)> {
        let now = Utc::now();
        let mut tx = self.ctx.store.begin().await?;

        owned_entry(tx.as_mut(), queue_id, user_id, LockMode::ForUpdate).await?;

        let (role, request_id) = match tx.companion_for_queue(user_id, queue_id).await? {
            Some(companion) => (CompanionRole::Companion, companion.request_id),
            None => tx
                .requests_for_queue(user_id, queue_id)
                .await?
                .into_iter()
                .find(|r| r.status == RequestStatus::Matched)
                .map(|r| (CompanionRole::Requester, r.id))
                .ok_or(QueueError::NothingToWithdraw)?,
        };
        let request = tx
            .companion_request(request_id, LockMode::ForUpdate)
            .await?
            .ok_or(QueueError::NothingToWithdraw)?;

        let fee = withdrawal_fee(&self.ctx.policy, request.offered_price);
        let dissolved = dissolve_match(tx.as_mut(), request, role, now).await?;
        tx.commit().await?;

        Ok((Withdrawal { request_id, role, fee }, dissolved))
    }

    /// Отмена ещё не принятого запроса его автором.
    pub async fn cancel_request(&self, request_id: Uuid, user_id: Uuid) -> QueueResult<CompanionRequest> {
        let request = self
            .update_pending("cancel_companion_request", request_id, user_id, |request| {
                request.status = RequestStatus::Cancelled;
            })
            .await?;
        info!(%request_id, %user_id, "companion request cancelled");
        Ok(request)
    }

    pub async fn update_price(&self, request_id: Uuid, user_id: Uuid, new_price: i64) -> QueueResult<CompanionRequest> {
        self.check_price(new_price)?;
        let request = self
            .update_pending("update_companion_price", request_id, user_id, move |request| {
                request.offered_price = new_price;
            })
            .await?;
        info!(%request_id, new_price, "companion request price updated");
        Ok(request)
    }

    async fn update_pending<F>(
        &self,
        operation: &'static str,
        request_id: Uuid,
        user_id: Uuid,
        change: F,
    ) -> QueueResult<CompanionRequest>
    where
        F: Fn(&mut CompanionRequest) + Copy + Send + Sync,
    {
        with_retry(self.ctx.retry, operation, move || async move {
            let mut tx = self.ctx.store.begin().await?;
            let mut request = tx
                .companion_request(request_id, LockMode::ForUpdate)
                .await?
                .ok_or_else(|| QueueError::not_found("companion request", request_id))?;
            if request.user_id != user_id {
                return Err(QueueError::Permission("companion request belongs to another user".to_string()));
            }
            if request.status != RequestStatus::Pending {
                return Err(QueueError::AlreadyProcessed);
            }
            change(&mut request);
            tx.update_companion_request(&request).await?;
            tx.commit().await?;
            Ok(request)
        })
        .await
    }

    pub async fn request(&self, request_id: Uuid) -> QueueResult<CompanionRequest> {
        let mut tx = self.ctx.store.begin().await?;
        let request = tx.companion_request(request_id, LockMode::Read).await?;
        request.ok_or_else(|| QueueError::not_found("companion request", request_id))
    }

    pub async fn user_requests(&self, user_id: Uuid) -> QueueResult<Vec<CompanionRequest>> {
        let mut tx = self.ctx.store.begin().await?;
        let requests = tx.requests_for_user(user_id).await?;
        Ok(requests)
    }

    pub async fn user_companions(&self, user_id: Uuid) -> QueueResult<Vec<Companion>> {
        let mut tx = self.ctx.store.begin().await?;
        let companions = tx.companions_for_user(user_id).await?;
        Ok(companions)
    }

    /// Ожидающие несвязанные записи того же слота в окне поиска запроса.
    pub async fn find_candidates(&self, request_id: Uuid) -> QueueResult<Vec<QueueEntry>> {
        let mut tx = self.ctx.store.begin().await?;
        let request = tx
            .companion_request(request_id, LockMode::Read)
            .await?
            .ok_or_else(|| QueueError::not_found("companion request", request_id))?;
        let entries = tx.entries_for_slot(request.event_id, request.time_slot_id).await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.status == QueueStatus::Waiting && !e.is_companion_service())
            .filter(|e| e.user_id != request.user_id)
            .filter(|e| request.window_contains(e.original_queue_number))
            .collect())
    }

    /// Pending-запросы слота, в окно которых попадает запись пользователя.
    pub async fn open_requests_for_entry(&self, queue_id: Uuid, user_id: Uuid) -> QueueResult<Vec<CompanionRequest>> {
        let mut tx = self.ctx.store.begin().await?;
        let entry = owned_entry(tx.as_mut(), queue_id, user_id, LockMode::Read).await?;
        if entry.status != QueueStatus::Waiting || entry.is_companion_service() {
            return Ok(Vec::new());
        }
        let pending = tx.pending_requests(Some(entry.time_slot_id)).await?;

        Ok(pending
            .into_iter()
            .filter(|r| r.event_id == entry.event_id && r.user_id != user_id)
            .filter(|r| r.window_contains(entry.original_queue_number))
            .collect())
    }
}

/// Запись пользователя. С `ForUpdate` сначала блокируется слот записи,
/// как и во всех остальных транзакциях очереди.
async fn owned_entry(tx: &mut dyn StoreTx, queue_id: Uuid, user_id: Uuid, lock: LockMode) -> QueueResult<QueueEntry> {
    let mut entry = tx
        .queue_entry(queue_id, LockMode::Read)
        .await?
        .ok_or_else(|| QueueError::not_found("queue entry", queue_id))?;
    if lock == LockMode::ForUpdate {
        tx.time_slot(entry.time_slot_id, LockMode::ForUpdate).await?;
        entry = tx
            .queue_entry(queue_id, LockMode::ForUpdate)
            .await?
            .ok_or_else(|| QueueError::not_found("queue entry", queue_id))?;
    }
    if entry.user_id != user_id {
        return Err(QueueError::Permission("queue entry belongs to another user".to_string()));
    }
    Ok(entry)
}

fn ensure_linkable(entry: &QueueEntry, side: &str) -> QueueResult<()> {
    if entry.status != QueueStatus::Waiting {
        return Err(QueueError::InvalidState(format!("{} entry is {}", side, entry.status)));
    }
    if entry.is_companion_service() {
        return Err(QueueError::InvalidState(format!("{} entry is already linked", side)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn search_range_grows_per_minute_and_caps() {
        let policy = QueuePolicy::default();
        let created = Utc::now();
        assert_eq!(search_range_at(&policy, created, created), 5);
        assert_eq!(search_range_at(&policy, created, created + Duration::seconds(59)), 5);
        assert_eq!(search_range_at(&policy, created, created + Duration::minutes(1)), 10);
        assert_eq!(search_range_at(&policy, created, created + Duration::minutes(9)), 50);
        assert_eq!(search_range_at(&policy, created, created + Duration::hours(5)), 50);
    }

    #[test]
    fn fee_is_twenty_percent_rounded_down() {
        let policy = QueuePolicy::default();
        assert_eq!(withdrawal_fee(&policy, 10_000), 2_000);
        assert_eq!(withdrawal_fee(&policy, 12_345), 2_469);
    }

    #[test]
    fn fee_of_huge_price_does_not_overflow() {
        let policy = QueuePolicy::default();
        assert_eq!(withdrawal_fee(&policy, i64::MAX), i64::MAX / 5);
        let everything = QueuePolicy { withdrawal_fee_percent: 100, ..policy };
        assert_eq!(withdrawal_fee(&everything, i64::MAX), i64::MAX);
    }

    proptest! {
        #[test]
        fn search_range_is_monotone_and_bounded(a in 0i64..100_000, b in 0i64..100_000) {
            let policy = QueuePolicy::default();
            let created = Utc::now();
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            let r1 = search_range_at(&policy, created, created + Duration::seconds(early));
            let r2 = search_range_at(&policy, created, created + Duration::seconds(late));
            prop_assert!(r1 <= r2);
            prop_assert!((policy.initial_search_range..=policy.max_search_range).contains(&r2));
        }

        #[test]
        fn fee_never_exceeds_a_fifth(price in 10_000i64..10_000_000) {
            let fee = withdrawal_fee(&QueuePolicy::default(), price);
            prop_assert!(fee * 5 <= price);
            prop_assert!(price - fee * 5 < 5);
        }
    }
}

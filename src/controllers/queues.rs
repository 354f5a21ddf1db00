use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::controllers::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{CompanionRequest, QueueEntry};
use crate::services::matching::Withdrawal;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queues", get(my_queues).post(join_queue))
        .route("/queues/{id}", get(get_entry).delete(cancel_queue))
        .route("/queues/{id}/enter", post(mark_entered))
        .route("/queues/{id}/withdraw", post(withdraw))
        .route("/queues/{id}/companion-requests", get(open_requests_for_entry))
}

#[derive(Debug, Deserialize)]
struct JoinQueueRequest {
    event_id: Uuid,
    time_slot_id: Uuid,
}

// POST /api/queues
async fn join_queue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<JoinQueueRequest>,
) -> ApiResult<(StatusCode, Json<QueueEntry>)> {
    let entry = state
        .core
        .admission
        .join_queue(req.event_id, req.time_slot_id, user.user_id)
        .await?;
    state.cache.invalidate_slot(req.time_slot_id).await;
    Ok((StatusCode::CREATED, Json(entry)))
}

// GET /api/queues - активные записи текущего пользователя
async fn my_queues(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<Vec<QueueEntry>>> {
    Ok(Json(state.core.admission.user_queues(user.user_id).await?))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<Json<QueueEntry>> {
    let entry = state.core.admission.entry(queue_id).await?;
    if entry.user_id != user.user_id && !user.is_admin() {
        return Err(ApiError::Forbidden("queue entry belongs to another user".to_string()));
    }
    Ok(Json(entry))
}

// DELETE /api/queues/{id}
async fn cancel_queue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<Json<QueueEntry>> {
    let entry = state.core.admission.cancel_queue(queue_id, user.user_id).await?;
    state.cache.invalidate_slot(entry.time_slot_id).await;
    Ok(Json(entry))
}

// POST /api/queues/{id}/enter - отметка на входе, только персонал
async fn mark_entered(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<Json<QueueEntry>> {
    user.require_admin()?;
    Ok(Json(state.core.dispatcher.mark_entered(queue_id).await?))
}

// POST /api/queues/{id}/withdraw
async fn withdraw(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<Json<Withdrawal>> {
    Ok(Json(state.core.matching.withdraw(user.user_id, queue_id).await?))
}

// GET /api/queues/{id}/companion-requests - чьи запросы может принять владелец записи
async fn open_requests_for_entry(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<Json<Vec<CompanionRequest>>> {
    Ok(Json(state.core.matching.open_requests_for_entry(queue_id, user.user_id).await?))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::controllers::error::ApiResult;
use crate::middleware::AuthUser;
use crate::models::{QueueEntry, QueueSummary, TimeSlot, TimeSlotSummary};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/time-slots/{id}", get(get_time_slot))
        .route("/time-slots/{id}/summary", get(slot_summary))
        .route("/time-slots/{id}/capacity", patch(update_capacity))
        .route("/time-slots/{id}/close", post(close_slot))
        .route("/time-slots/{id}/reopen", post(reopen_slot))
        .route("/time-slots/{id}/entries", get(slot_entries))
        .route("/time-slots/{id}/queue-summary", get(queue_summary))
        .route("/time-slots/{id}/call-next", post(call_next))
}

async fn get_time_slot(State(state): State<Arc<AppState>>, Path(slot_id): Path<Uuid>) -> ApiResult<Json<TimeSlot>> {
    Ok(Json(state.core.catalog.time_slot(slot_id).await?))
}

// GET /api/time-slots/{id}/summary
async fn slot_summary(State(state): State<Arc<AppState>>, Path(slot_id): Path<Uuid>) -> ApiResult<Response> {
    // Сначала пробуем кеш
    if let Some(summary) = state.cache.get_slot_summary(slot_id).await {
        return Ok(([("X-Cache", "HIT")], Json(summary)).into_response());
    }

    let summary: TimeSlotSummary = state.core.catalog.slot_summary(slot_id).await?;
    state.cache.save_slot_summary(&summary).await;
    Ok(([("X-Cache", "MISS")], Json(summary)).into_response())
}

#[derive(Debug, Deserialize, Validate)]
struct CapacityRequest {
    #[validate(range(min = 1, max = 100000))]
    max_capacity: i32,
}

// PATCH /api/time-slots/{id}/capacity
async fn update_capacity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(slot_id): Path<Uuid>,
    Json(req): Json<CapacityRequest>,
) -> ApiResult<Json<TimeSlot>> {
    user.require_admin()?;
    req.validate()?;
    let slot = state.core.catalog.update_slot_capacity(slot_id, req.max_capacity).await?;
    state.cache.invalidate_slot(slot_id).await;
    Ok(Json(slot))
}

async fn close_slot(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(slot_id): Path<Uuid>,
) -> ApiResult<Json<TimeSlot>> {
    set_closed(state, user, slot_id, true).await
}

async fn reopen_slot(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(slot_id): Path<Uuid>,
) -> ApiResult<Json<TimeSlot>> {
    set_closed(state, user, slot_id, false).await
}

async fn set_closed(state: Arc<AppState>, user: AuthUser, slot_id: Uuid, closed: bool) -> ApiResult<Json<TimeSlot>> {
    user.require_admin()?;
    let slot = state.core.catalog.set_slot_closed(slot_id, closed).await?;
    state.cache.invalidate_slot(slot_id).await;
    Ok(Json(slot))
}

// GET /api/time-slots/{id}/entries
async fn slot_entries(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(slot_id): Path<Uuid>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    user.require_admin()?;
    let slot = state.core.catalog.time_slot(slot_id).await?;
    Ok(Json(state.core.admission.slot_entries(slot.event_id, slot_id).await?))
}

// GET /api/time-slots/{id}/queue-summary
async fn queue_summary(State(state): State<Arc<AppState>>, Path(slot_id): Path<Uuid>) -> ApiResult<Json<QueueSummary>> {
    let slot = state.core.catalog.time_slot(slot_id).await?;
    Ok(Json(state.core.admission.queue_summary(slot.event_id, slot_id).await?))
}

// POST /api/time-slots/{id}/call-next
async fn call_next(State(state): State<Arc<AppState>>, user: AuthUser, Path(slot_id): Path<Uuid>) -> ApiResult<Response> {
    user.require_admin()?;
    let called = state.core.dispatcher.call_next(slot_id).await?;
    state.cache.invalidate_slot(slot_id).await;
    Ok(match called {
        Some(entry) => Json(entry).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

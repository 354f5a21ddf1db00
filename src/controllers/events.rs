use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::controllers::error::ApiResult;
use crate::middleware::AuthUser;
use crate::models::{Event, EventStatus, TimeSlot};
use crate::services::catalog::{EventWithSlots, NewEvent};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/status", patch(update_event_status))
        .route("/events/{id}/time-slots", get(list_time_slots))
}

// GET /api/events
async fn list_events(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(state.core.catalog.list_events().await?))
}

// POST /api/events
async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<NewEvent>,
) -> ApiResult<(StatusCode, Json<EventWithSlots>)> {
    user.require_admin()?;
    let created = state.core.catalog.create_event(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// GET /api/events/{id}
async fn get_event(State(state): State<Arc<AppState>>, Path(event_id): Path<Uuid>) -> ApiResult<Json<Event>> {
    Ok(Json(state.core.catalog.event(event_id).await?))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: EventStatus,
}

// PATCH /api/events/{id}/status
async fn update_event_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Event>> {
    user.require_admin()?;
    Ok(Json(state.core.catalog.update_event_status(event_id, req.status).await?))
}

// GET /api/events/{id}/time-slots
async fn list_time_slots(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TimeSlot>>> {
    Ok(Json(state.core.catalog.time_slots(event_id).await?))
}

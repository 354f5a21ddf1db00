use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::inbox::{InboxItem, INBOX_LIMIT};
use crate::controllers::error::ApiResult;
use crate::error::QueueError;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(inbox))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
        .route("/notifications/{id}", delete(delete_notification))
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    limit: Option<isize>,
}

#[derive(Debug, Serialize)]
struct UnreadCount {
    unread: usize,
}

#[derive(Debug, Serialize)]
struct MarkedRead {
    marked: usize,
}

// GET /api/notifications?limit=20
async fn inbox(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<InboxQuery>,
) -> ApiResult<Json<Vec<InboxItem>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, INBOX_LIMIT);
    Ok(Json(state.cache.notifications(user.user_id, limit).await?))
}

// GET /api/notifications/unread-count
async fn unread_count(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<UnreadCount>> {
    let unread = state.cache.unread_count(user.user_id).await?;
    Ok(Json(UnreadCount { unread }))
}

// POST /api/notifications/{id}/read
async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.cache.mark_read(user.user_id, id).await? {
        return Err(QueueError::not_found("notification", id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/notifications/read-all
async fn mark_all_read(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<MarkedRead>> {
    let marked = state.cache.mark_all_read(user.user_id).await?;
    Ok(Json(MarkedRead { marked }))
}

// DELETE /api/notifications/{id}
async fn delete_notification(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.cache.delete_notification(user.user_id, id).await? {
        return Err(QueueError::not_found("notification", id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

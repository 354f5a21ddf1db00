use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::config::OFFERED_PRICE_CEILING;
use crate::controllers::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{Companion, CompanionRequest, QueueEntry};
use crate::services::matching::Withdrawal;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/companion-requests", get(my_requests).post(create_request))
        .route("/companion-requests/expand", post(expand_all))
        .route("/companion-requests/{id}", get(get_request))
        .route("/companion-requests/{id}/price", patch(update_price))
        .route("/companion-requests/{id}/cancel", post(cancel_request))
        .route("/companion-requests/{id}/candidates", get(candidates))
        .route("/companion-requests/{id}/expand", post(expand_one))
        .route("/companion-requests/{id}/accept", post(accept))
        .route("/companion-requests/{id}/withdraw", post(withdraw))
        .route("/companions", get(my_companions))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateRequestBody {
    queue_id: Uuid,
    #[validate(range(min = 1))]
    original_queue_number: Option<i32>,
    #[validate(range(min = 0, max = OFFERED_PRICE_CEILING))]
    offered_price: i64,
}

// POST /api/companion-requests
async fn create_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateRequestBody>,
) -> ApiResult<(StatusCode, Json<CompanionRequest>)> {
    req.validate()?;
    let request = state
        .core
        .matching
        .create_request(user.user_id, req.queue_id, req.original_queue_number, req.offered_price)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn my_requests(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<Vec<CompanionRequest>>> {
    Ok(Json(state.core.matching.user_requests(user.user_id).await?))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<CompanionRequest>> {
    Ok(Json(state.core.matching.request(request_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
struct PriceBody {
    #[validate(range(min = 0, max = OFFERED_PRICE_CEILING))]
    offered_price: i64,
}

// PATCH /api/companion-requests/{id}/price
async fn update_price(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
    Json(req): Json<PriceBody>,
) -> ApiResult<Json<CompanionRequest>> {
    req.validate()?;
    let request = state
        .core
        .matching
        .update_price(request_id, user.user_id, req.offered_price)
        .await?;
    Ok(Json(request))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<CompanionRequest>> {
    Ok(Json(state.core.matching.cancel_request(request_id, user.user_id).await?))
}

// GET /api/companion-requests/{id}/candidates - только автору запроса
async fn candidates(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    let request = state.core.matching.request(request_id).await?;
    if request.user_id != user.user_id && !user.is_admin() {
        return Err(ApiError::Forbidden("companion request belongs to another user".to_string()));
    }
    Ok(Json(state.core.matching.find_candidates(request_id).await?))
}

async fn expand_one(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<CompanionRequest>> {
    Ok(Json(state.core.matching.expand_search_range(request_id).await?))
}

#[derive(Debug, Serialize)]
struct ExpandResponse {
    expanded: usize,
}

// POST /api/companion-requests/expand - ручной запуск прохода расширения
async fn expand_all(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<ExpandResponse>> {
    user.require_admin()?;
    let expanded = state.core.matching.expand_all_pending(chrono::Utc::now()).await?;
    Ok(Json(ExpandResponse { expanded }))
}

#[derive(Debug, Deserialize)]
struct AcceptBody {
    companion_queue_id: Uuid,
    companion_original_number: Option<i32>,
}

// POST /api/companion-requests/{id}/accept
async fn accept(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
    Json(req): Json<AcceptBody>,
) -> ApiResult<Json<CompanionRequest>> {
    let request = state
        .core
        .matching
        .accept(request_id, user.user_id, req.companion_queue_id, req.companion_original_number)
        .await?;
    Ok(Json(request))
}

// POST /api/companion-requests/{id}/withdraw
async fn withdraw(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<Withdrawal>> {
    Ok(Json(state.core.matching.withdraw_by_request(request_id, user.user_id).await?))
}

async fn my_companions(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<Vec<Companion>>> {
    Ok(Json(state.core.matching.user_companions(user.user_id).await?))
}

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::controllers::error::{ApiError, ApiResult};
use crate::middleware::{authenticate_basic, basic_credentials, issue_token};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/token", post(issue))
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
}

// POST /api/auth/token - обмен Basic-учётки на JWT
async fn issue(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<TokenResponse>> {
    let (email, password) =
        basic_credentials(&headers).ok_or_else(|| ApiError::Unauthorized("Basic credentials required".to_string()))?;
    let user = authenticate_basic(&state, &email, &password).await?;

    let hours = state.config.jwt.expires_in_hours;
    let access_token = issue_token(&user, &state.config.jwt.secret, hours)?;
    info!(user_id = %user.user_id, "access token issued");

    Ok(Json(TokenResponse { access_token, token_type: "Bearer", expires_in: hours * 3600 }))
}

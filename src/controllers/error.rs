use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{ErrorKind, QueueError};

/// Ошибка HTTP-слоя: доменные ошибки очереди плюс то, что знает только HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Queue(errors.into())
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Permission => StatusCode::FORBIDDEN,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Queue(err) => match err.kind() {
                // наружу не отдаём детали базы
                ErrorKind::Internal => {
                    tracing::error!(error = %err, "Internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        err.code(),
                        "An internal error occurred".to_string(),
                    )
                }
                ErrorKind::Transient => {
                    tracing::warn!(error = %err, "Transient store error surfaced to client");
                    (StatusCode::SERVICE_UNAVAILABLE, "TRANSIENT", "Please retry shortly".to_string())
                }
                kind => (status_for(kind), err.code(), err.to_string()),
            },
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::Redis(err) => {
                tracing::error!(error = %err, "Redis error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CACHE_UNAVAILABLE",
                    "Notification storage is unavailable".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases = [
            (QueueError::SlotFull, StatusCode::CONFLICT),
            (QueueError::Validation("price".into()), StatusCode::BAD_REQUEST),
            (QueueError::not_found("queue entry", Uuid::nil()), StatusCode::NOT_FOUND),
            (QueueError::Permission("owner".into()), StatusCode::FORBIDDEN),
            (QueueError::Transient("busy".into()), StatusCode::SERVICE_UNAVAILABLE),
            (QueueError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}

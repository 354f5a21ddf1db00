use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::controllers::error::ApiError;
use crate::models::User;

/// Claims нашего JWT.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".to_string()))
        }
    }
}

pub fn issue_token(user: &User, secret: &str, expires_in_hours: i64) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.user_id,
        role: user.role.clone(),
        exp: (Utc::now() + Duration::hours(expires_in_hours)).timestamp().max(0) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Queue(crate::error::QueueError::Internal(e.to_string())))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| ApiError::Unauthorized(format!("invalid token: {}", e)))
}

/// Разбирает `Authorization: Basic` в пару email/пароль.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (email, password) = credentials.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}

/// Проверяет email/пароль по таблице users.
pub async fn authenticate_basic(state: &crate::AppState, email: &str, password: &str) -> Result<User, ApiError> {
    let user = User::find_by_email(email, &state.db)
        .await
        .map_err(crate::error::QueueError::from)?
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".to_string()))?;

    if !user.verify_password(password) {
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    // ошибку обновления игнорируем
    user.touch_login(&state.db).await.ok();
    Ok(user)
}

// Bearer JWT или Basic auth
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<crate::AppState>) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            let claims = decode_token(token, &state.config.jwt.secret)?;
            return Ok(AuthUser { user_id: claims.sub, role: claims.role });
        }

        let (email, password) =
            basic_credentials(&parts.headers).ok_or_else(|| ApiError::Unauthorized("unsupported authorization".to_string()))?;
        let user = authenticate_basic(state, &email, &password).await?;
        Ok(AuthUser { user_id: user.user_id, role: user.role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn user(role: &str) -> User {
        User {
            user_id: Uuid::new_v4(),
            email: "staff@example.com".to_string(),
            password_hash: String::new(),
            display_name: "Staff".to_string(),
            role: role.to_string(),
            is_active: true,
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn token_roundtrip_keeps_subject_and_role() {
        let admin = user("admin");
        let token = issue_token(&admin, "secret", 1).unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, admin.user_id);
        assert_eq!(claims.role, "admin");
        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[test]
    fn parses_basic_credentials() {
        let encoded = general_purpose::STANDARD.encode("guest@example.com:pa:ss");
        let (parts, _) = Request::builder()
            .header(header::AUTHORIZATION, format!("Basic {}", encoded))
            .body(())
            .unwrap()
            .into_parts();
        let (email, password) = basic_credentials(&parts.headers).unwrap();
        assert_eq!(email, "guest@example.com");
        assert_eq!(password, "pa:ss");
    }

    #[test]
    fn non_admin_is_forbidden() {
        let auth = AuthUser { user_id: Uuid::new_v4(), role: "user".to_string() };
        assert!(matches!(auth.require_admin(), Err(ApiError::Forbidden(_))));
    }
}

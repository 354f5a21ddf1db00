use serde::Serialize;
use sqlx::FromRow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    // Найти активного пользователя по email
    pub async fn find_by_email(email: &str, db: &crate::database::Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, email, password_hash, display_name, role, is_active, created_at, last_login_at
             FROM users
             WHERE email = $1 AND is_active = true"
        )
        .bind(email)
        .fetch_optional(&db.pool)
        .await
    }

    pub async fn touch_login(&self, db: &crate::database::Database) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE user_id = $1")
            .bind(self.user_id)
            .execute(&db.pool)
            .await?;
        Ok(())
    }

    // Проверить пароль по bcrypt-хешу
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_hash(hash: String) -> User {
        User {
            user_id: Uuid::new_v4(),
            email: "guest@example.com".to_string(),
            password_hash: hash,
            display_name: "Guest".to_string(),
            role: "user".to_string(),
            is_active: true,
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn verifies_bcrypt_password() {
        let hash = bcrypt::hash("s3cret", 4).unwrap();
        let user = user_with_hash(hash);
        assert!(user.verify_password("s3cret"));
        assert!(!user.verify_password("wrong"));
        assert!(!user.is_admin());
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let user = user_with_hash("not-a-hash".to_string());
        assert!(!user.verify_password("anything"));
    }
}

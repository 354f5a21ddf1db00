use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::services::retry::RetryPolicy;

/// Абсолютный потолок цены сопровождения. Политика может задать
/// максимум ниже, но не выше: так расчёт штрафа не переполняется.
pub const OFFERED_PRICE_CEILING: i64 = 1_000_000_000;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub notifications: NotificationConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub queue: QueuePolicy,
    pub retry: RetryConfig,
    pub features: FeatureFlags,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// `json` включает структурированный вывод логов.
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// TTL кэша сводки по слоту, секунды.
    pub slot_summary_ttl_secs: u64,
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_hours: i64,
}

// Куда отправлять уведомления помимо redis
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

// Настройки Circuit Breaker для вебхука
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

/// Бизнес-константы очереди и сопровождения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct QueuePolicy {
    /// Минут обслуживания на одного человека для оценки ожидания.
    pub service_minutes_per_person: i32,
    pub min_offered_price: i64,
    pub max_offered_price: i64,
    pub initial_search_range: i32,
    /// Прирост диапазона поиска за каждую минуту ожидания.
    pub search_range_step: i32,
    pub max_search_range: i32,
    pub withdrawal_fee_percent: i64,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            service_minutes_per_person: 5,
            min_offered_price: 10_000,
            max_offered_price: 10_000_000,
            initial_search_range: 5,
            search_range_step: 5,
            max_search_range: 50,
            withdrawal_fee_percent: 20,
        }
    }
}

impl QueuePolicy {
    /// Проверка согласованности значений, заданных через окружение.
    pub fn validate(&self) -> QueueResult<()> {
        let invalid = |msg: String| Err(QueueError::Validation(msg));
        if self.service_minutes_per_person < 0 {
            return invalid("service_minutes_per_person must not be negative".to_string());
        }
        if self.min_offered_price <= 0 {
            return invalid("min_offered_price must be positive".to_string());
        }
        if self.max_offered_price < self.min_offered_price || self.max_offered_price > OFFERED_PRICE_CEILING {
            return invalid(format!(
                "max_offered_price must be within {}..={}",
                self.min_offered_price, OFFERED_PRICE_CEILING
            ));
        }
        if self.initial_search_range < 0 || self.search_range_step < 0 {
            return invalid("search range values must not be negative".to_string());
        }
        if self.initial_search_range > self.max_search_range {
            return invalid("initial_search_range exceeds max_search_range".to_string());
        }
        if !(0..=100).contains(&self.withdrawal_fee_percent) {
            return invalid("withdrawal_fee_percent must be within 0..=100".to_string());
        }
        Ok(())
    }
}

// Повтор транзакций при конфликтах
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    /// Пускать в очередь только с подтверждённым билетом.
    pub require_verified_ticket: bool,
    pub enable_search_expansion: bool,
    pub search_expand_interval_secs: u64,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: &str) -> T {
    var_or(name, default)
        .parse()
        .unwrap_or_else(|_| panic!("{} must be a valid value", name))
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = QueuePolicy::default();
        let config = Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parsed_or("PORT", "8000"),
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "queue_system=debug,tower_http=debug"),
                log_format: var_or("LOG_FORMAT", "pretty"),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: parsed_or("DB_POOL_SIZE", "20"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
                slot_summary_ttl_secs: parsed_or("SLOT_SUMMARY_TTL_SECS", "5"),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
                expires_in_hours: parsed_or("JWT_EXPIRES_IN_HOURS", "24"),
            },
            notifications: NotificationConfig {
                webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok().filter(|url| !url.is_empty()),
                timeout_seconds: parsed_or("NOTIFICATION_TIMEOUT_SECONDS", "5"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5"),
                timeout_seconds: parsed_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60"),
            },
            queue: QueuePolicy {
                service_minutes_per_person: parsed_or(
                    "QUEUE_SERVICE_MINUTES_PER_PERSON",
                    &defaults.service_minutes_per_person.to_string(),
                ),
                min_offered_price: parsed_or("COMPANION_MIN_PRICE", &defaults.min_offered_price.to_string()),
                max_offered_price: parsed_or("COMPANION_MAX_PRICE", &defaults.max_offered_price.to_string()),
                initial_search_range: parsed_or(
                    "COMPANION_INITIAL_SEARCH_RANGE",
                    &defaults.initial_search_range.to_string(),
                ),
                search_range_step: parsed_or("COMPANION_SEARCH_RANGE_STEP", &defaults.search_range_step.to_string()),
                max_search_range: parsed_or("COMPANION_MAX_SEARCH_RANGE", &defaults.max_search_range.to_string()),
                withdrawal_fee_percent: parsed_or(
                    "COMPANION_WITHDRAWAL_FEE_PERCENT",
                    &defaults.withdrawal_fee_percent.to_string(),
                ),
            },
            retry: RetryConfig {
                max_attempts: parsed_or("STORE_RETRY_MAX_ATTEMPTS", "3"),
                backoff_ms: parsed_or("STORE_RETRY_BACKOFF_MS", "25"),
            },
            features: FeatureFlags {
                require_verified_ticket: parsed_or("REQUIRE_VERIFIED_TICKET", "false"),
                enable_search_expansion: parsed_or("ENABLE_SEARCH_EXPANSION", "true"),
                search_expand_interval_secs: parsed_or("SEARCH_EXPAND_INTERVAL_SECS", "60"),
            },
        };

        if let Err(e) = config.queue.validate() {
            panic!("invalid queue policy: {}", e);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_maps_to_policy() {
        let policy = RetryConfig { max_attempts: 4, backoff_ms: 10 }.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, Duration::from_millis(10));
    }

    #[test]
    fn default_policy_matches_business_rules() {
        let policy = QueuePolicy::default();
        assert_eq!(policy.min_offered_price, 10_000);
        assert_eq!(policy.withdrawal_fee_percent, 20);
        assert_eq!(policy.service_minutes_per_person, 5);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn rejects_inconsistent_policy() {
        let base = QueuePolicy::default();
        let broken = [
            QueuePolicy { min_offered_price: 0, ..base },
            QueuePolicy { max_offered_price: 5_000, ..base },
            QueuePolicy { max_offered_price: OFFERED_PRICE_CEILING + 1, ..base },
            QueuePolicy { initial_search_range: 60, ..base },
            QueuePolicy { withdrawal_fee_percent: 101, ..base },
            QueuePolicy { withdrawal_fee_percent: -1, ..base },
        ];
        for policy in broken {
            assert!(
                matches!(policy.validate(), Err(QueueError::Validation(_))),
                "accepted {:?}",
                policy
            );
        }
    }
}

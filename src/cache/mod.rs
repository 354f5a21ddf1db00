use crate::redis_client::RedisClient;
use tracing::info;

pub mod inbox;
pub mod slots;

/// Redis-кеш поверх ядра очереди. Источник правды всегда хранилище,
/// кеш только ускоряет чтение и допускает промахи.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    slot_summary_ttl: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, slot_summary_ttl: u64) -> Self {
        info!(slot_summary_ttl, "cache service initialized");
        Self { redis, slot_summary_ttl }
    }
}

use redis::{aio::ConnectionManager, Client};
use tracing::info;

/// Соединение с redis, переподключается само после обрывов.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        info!("Redis connection manager ready");
        Ok(RedisClient { conn })
    }
}

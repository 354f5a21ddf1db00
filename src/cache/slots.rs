use crate::cache::CacheService;
use crate::models::TimeSlotSummary;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

fn summary_key(time_slot_id: Uuid) -> String {
    format!("slot_summary:{}", time_slot_id)
}

impl CacheService {
    // Сводка по слоту из кеша; любая ошибка redis считается промахом
    pub async fn get_slot_summary(&self, time_slot_id: Uuid) -> Option<TimeSlotSummary> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(summary_key(time_slot_id)).await.ok()?;
        serde_json::from_str(&data?).ok()
    }

    pub async fn save_slot_summary(&self, summary: &TimeSlotSummary) {
        let Ok(data) = serde_json::to_string(summary) else {
            return;
        };
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn
            .set_ex(summary_key(summary.time_slot_id), data, self.slot_summary_ttl)
            .await;
        if let Err(e) = result {
            warn!(time_slot_id = %summary.time_slot_id, error = %e, "failed to cache slot summary");
        }
    }

    /// Сбрасывается после каждого изменения счётчика слота.
    pub async fn invalidate_slot(&self, time_slot_id: Uuid) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn.del(summary_key(time_slot_id)).await;
        if let Err(e) = result {
            warn!(%time_slot_id, error = %e, "failed to invalidate slot summary");
        }
    }
}

use crate::cache::CacheService;
use crate::services::notifier::Notification;
use redis::AsyncCommands;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Сколько последних уведомлений хранится у пользователя.
pub const INBOX_LIMIT: isize = 100;

/// Канал pub/sub, в который публикуется каждое уведомление.
pub const NOTIFICATION_CHANNEL: &str = "notifications";

pub fn inbox_key(user_id: Uuid) -> String {
    format!("notifications:{}", user_id)
}

/// Множество id прочитанных уведомлений пользователя.
pub fn read_key(user_id: Uuid) -> String {
    format!("notifications:{}:read", user_id)
}

/// Уведомление во входящих вместе с отметкой о прочтении.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboxItem {
    #[serde(flatten)]
    pub notification: Notification,
    pub read: bool,
}

// битые записи пропускаем
fn parse_inbox(raw: &[String], read: &HashSet<String>) -> Vec<InboxItem> {
    raw.iter()
        .filter_map(|item| serde_json::from_str::<Notification>(item).ok())
        .map(|notification| {
            let read = read.contains(&notification.id.to_string());
            InboxItem { notification, read }
        })
        .collect()
}

// сырая строка списка нужна для LREM
fn find_raw(raw: &[String], notification_id: Uuid) -> Option<&String> {
    raw.iter().find(|item| {
        serde_json::from_str::<Notification>(item).is_ok_and(|n| n.id == notification_id)
    })
}

impl CacheService {
    async fn load_inbox(&self, user_id: Uuid) -> Result<(Vec<String>, HashSet<String>), redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let raw: Vec<String> = conn.lrange(inbox_key(user_id), 0, INBOX_LIMIT - 1).await?;
        let read: HashSet<String> = conn.smembers(read_key(user_id)).await?;
        Ok((raw, read))
    }

    /// Последние уведомления пользователя, новые первыми.
    pub async fn notifications(&self, user_id: Uuid, limit: isize) -> Result<Vec<InboxItem>, redis::RedisError> {
        let limit = limit.clamp(1, INBOX_LIMIT) as usize;
        let (raw, read) = self.load_inbox(user_id).await?;
        let mut items = parse_inbox(&raw, &read);
        items.truncate(limit);
        Ok(items)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<usize, redis::RedisError> {
        let (raw, read) = self.load_inbox(user_id).await?;
        Ok(parse_inbox(&raw, &read).iter().filter(|item| !item.read).count())
    }

    /// Отмечает уведомление прочитанным. `false`, если его нет во входящих.
    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<bool, redis::RedisError> {
        let (raw, _) = self.load_inbox(user_id).await?;
        if find_raw(&raw, notification_id).is_none() {
            return Ok(false);
        }
        let mut conn = self.redis.conn.clone();
        let _: () = conn.sadd(read_key(user_id), notification_id.to_string()).await?;
        Ok(true)
    }

    /// Отмечает прочитанными все уведомления во входящих, возвращает сколько было непрочитанных.
    /// Множество прочитанных пересобирается, так что id вытесненных записей из него уходят.
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<usize, redis::RedisError> {
        let (raw, read) = self.load_inbox(user_id).await?;
        let items = parse_inbox(&raw, &read);
        let unread = items.iter().filter(|item| !item.read).count();
        let ids: Vec<String> = items.iter().map(|item| item.notification.id.to_string()).collect();

        let key = read_key(user_id);
        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !ids.is_empty() {
            pipe.sadd(&key, ids).ignore();
        }
        let mut conn = self.redis.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(unread)
    }

    /// Удаляет уведомление из входящих. `false`, если его там не было.
    pub async fn delete_notification(&self, user_id: Uuid, notification_id: Uuid) -> Result<bool, redis::RedisError> {
        let (raw, _) = self.load_inbox(user_id).await?;
        let Some(item) = find_raw(&raw, notification_id) else {
            return Ok(false);
        };
        let mut conn = self.redis.conn.clone();
        let (removed,): (i64,) = redis::pipe()
            .atomic()
            .lrem(inbox_key(user_id), 1, item)
            .srem(read_key(user_id), notification_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

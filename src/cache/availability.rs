use crate::cache::CacheService;
use crate::services::inventory::Availability;
use redis::AsyncCommands;
use tracing::warn;

fn availability_key(event_id: i64) -> String {
    format!("availability:event:{}", event_id)
}

impl CacheService {
    /// Получить остатки события из кеша
    pub async fn get_availability(&self, event_id: i64) -> Option<Vec<Availability>> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.conn.clone();
        let data: Option<String> = match conn.get(availability_key(event_id)).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Availability cache read failed for event {}: {:?}", event_id, e);
                return None;
            }
        };
        data.and_then(|json| serde_json::from_str(&json).ok())
    }

    pub async fn save_availability(&self, event_id: i64, listing: &[Availability]) {
        let Some(redis) = self.redis.as_ref() else {
            return;
        };
        let data = match serde_json::to_string(listing) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize availability for event {}: {:?}", event_id, e);
                return;
            }
        };
        let mut conn = redis.conn.clone();
        let result: Result<(), redis::RedisError> = conn
            .set_ex(availability_key(event_id), data, self.ttl_seconds)
            .await;
        if let Err(e) = result {
            warn!("Availability cache write failed for event {}: {:?}", event_id, e);
        }
    }

    // Сбрасываем после любого изменения счётчика sold
    pub async fn invalidate_availability(&self, event_id: i64) {
        let Some(redis) = self.redis.as_ref() else {
            return;
        };
        let mut conn = redis.conn.clone();
        let result: Result<(), redis::RedisError> = conn.del(availability_key(event_id)).await;
        if let Err(e) = result {
            warn!("Availability cache invalidation failed for event {}: {:?}", event_id, e);
        }
    }
}

use crate::redis_client::RedisClient;
use tracing::info;

pub mod availability;

/// Кеш витрины поверх Redis. Без Redis все чтения - промах, инвалидация - no-op.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<RedisClient>,
    ttl_seconds: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, ttl_seconds: u64) -> Self {
        Self { redis: Some(redis), ttl_seconds }
    }

    pub fn disabled() -> Self {
        info!("Redis is not configured, availability cache disabled");
        Self { redis: None, ttl_seconds: 0 }
    }
}

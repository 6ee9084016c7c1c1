use async_trait::async_trait;
use innkeep_core::rate_limit::{RateLimitRule, RateLimiter};
use innkeep_core::{CoreError, CoreResult};
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed window counter. The window starts with the first hit on `key`.
    pub async fn check_rate_limit(&self, key: &str, limit: u64, window_seconds: u64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let count: u64 = conn.incr(key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, window_seconds as i64).await?;
        }

        debug!("Rate limit {}: {}/{}", key, count, limit);
        Ok(count <= limit)
    }
}

/// Shared-store limiter so every API instance counts against the same window.
pub struct RedisRateLimiter {
    client: RedisClient,
    rules: HashMap<String, RateLimitRule>,
}

impl RedisRateLimiter {
    pub fn new(client: RedisClient, rules: HashMap<String, RateLimitRule>) -> Self {
        Self { client, rules }
    }

    fn rule(&self, operation: &str) -> RateLimitRule {
        self.rules
            .get(operation)
            .copied()
            .unwrap_or_else(|| RateLimitRule::default_for(operation))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn hit(&self, operation: &str, identifier: &str) -> CoreResult<bool> {
        let rule = self.rule(operation);
        let key = format!("ratelimit:{}:{}", operation, identifier);
        self.client
            .check_rate_limit(&key, rule.limit, rule.window_seconds)
            .await
            .map_err(|e| CoreError::internal(format!("rate limiter unavailable: {}", e)))
    }
}

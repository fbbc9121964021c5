use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::config::redact_url;
use crate::error::{BotError, Result};
use crate::risk::RiskState;
use crate::store::RiskStateStore;

/// Redis persistence for per-bot circuit-breaker state
///
/// Each bot's `RiskState` is stored as JSON under `risk:{bot_id}`
#[derive(Clone)]
pub struct RedisRiskStore {
    conn: ConnectionManager,
}

fn key(bot_id: i64) -> String {
    format!("risk:{}", bot_id)
}

impl RedisRiskStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| BotError::Storage("Redis connection timeout after 5 seconds".to_string()))??;

        tracing::info!("Connected to Redis at {}", redact_url(redis_url));

        Ok(Self { conn })
    }

    /// Remove a bot's stored state
    pub async fn clear(&self, bot_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key(bot_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl RiskStateStore for RedisRiskStore {
    async fn load(&self, bot_id: i64) -> Result<RiskState> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = conn.get(key(bot_id)).await?;

        match stored {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                BotError::Storage(format!("corrupt risk state for bot {}: {}", bot_id, e))
            }),
            None => Ok(RiskState::default()),
        }
    }

    async fn save(&self, bot_id: i64, state: &RiskState) -> Result<()> {
        let json = serde_json::to_string(state)
            .map_err(|e| BotError::Storage(format!("cannot encode risk state: {}", e)))?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key(bot_id), json).await?;

        tracing::debug!("Saved risk state for bot {} to Redis", bot_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_key_format() {
        assert_eq!(key(42), "risk:42");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        let result = RedisRiskStore::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_save_and_load_state() {
        let store = RedisRiskStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        let _ = store.clear(-1).await;

        assert_eq!(store.load(-1).await.unwrap(), RiskState::default());

        let state = RiskState {
            paused_until: Some(Utc::now() + chrono::Duration::hours(3)),
            pause_reason: Some("Circuit breaker: losing streak".to_string()),
            window_start: None,
        };
        store.save(-1, &state).await.unwrap();
        assert_eq!(store.load(-1).await.unwrap(), state);

        let _ = store.clear(-1).await;
    }
}

// Storage seams for bot configuration, trade history and risk state
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{BotConfig, ExchangeAccount, Trade};
use crate::risk::RiskState;

pub use memory::{MemoryRiskStore, MemoryStore};

/// Read-only view of bot configuration and exchange credentials
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn active_bots(&self) -> Result<Vec<BotConfig>>;

    async fn bot(&self, bot_id: i64) -> Result<Option<BotConfig>>;

    async fn exchange_account(&self, account_id: i64) -> Result<Option<ExchangeAccount>>;
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert_trade(&self, trade: &Trade) -> Result<()>;

    /// Overwrite status, order id and exchange response of an existing trade
    async fn update_trade(&self, trade: &Trade) -> Result<()>;

    /// Every trade of one bot, oldest first
    async fn trades_for_bot(&self, bot_id: i64) -> Result<Vec<Trade>>;

    /// Trades of all bots created in `[start, end)`
    async fn trades_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Trade>>;
}

/// Per-bot circuit-breaker state that has to survive restarts
#[async_trait]
pub trait RiskStateStore: Send + Sync {
    /// Stored state, or the default (not paused) state
    async fn load(&self, bot_id: i64) -> Result<RiskState>;

    async fn save(&self, bot_id: i64, state: &RiskState) -> Result<()>;
}

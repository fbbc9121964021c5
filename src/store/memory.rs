use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ConfigStore, RiskStateStore, TradeStore};
use crate::decision_log::DecisionLog;
use crate::error::{BotError, Result};
use crate::models::{BotConfig, DecisionLogEntry, ExchangeAccount, Trade};
use crate::risk::RiskState;

/// In-process store for tests and dry local runs
#[derive(Default)]
pub struct MemoryStore {
    bots: RwLock<HashMap<i64, BotConfig>>,
    accounts: RwLock<HashMap<i64, ExchangeAccount>>,
    trades: RwLock<Vec<Trade>>,
    decisions: RwLock<Vec<DecisionLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_bot(&self, bot: BotConfig) {
        self.bots.write().await.insert(bot.id, bot);
    }

    pub async fn add_account(&self, account: ExchangeAccount) {
        self.accounts.write().await.insert(account.id, account);
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.trades.read().await.clone()
    }

    pub async fn decisions(&self) -> Vec<DecisionLogEntry> {
        self.decisions.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn active_bots(&self) -> Result<Vec<BotConfig>> {
        let mut bots: Vec<BotConfig> = self
            .bots
            .read()
            .await
            .values()
            .filter(|b| b.is_active)
            .cloned()
            .collect();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    async fn bot(&self, bot_id: i64) -> Result<Option<BotConfig>> {
        Ok(self.bots.read().await.get(&bot_id).cloned())
    }

    async fn exchange_account(&self, account_id: i64) -> Result<Option<ExchangeAccount>> {
        Ok(self.accounts.read().await.get(&account_id).cloned())
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        if trades.iter().any(|t| t.id == trade.id) {
            return Err(BotError::Storage(format!("trade {} already exists", trade.id)));
        }
        trades.push(trade.clone());
        Ok(())
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        let stored = trades
            .iter_mut()
            .find(|t| t.id == trade.id)
            .ok_or_else(|| BotError::Storage(format!("trade {} not found", trade.id)))?;
        *stored = trade.clone();
        Ok(())
    }

    async fn trades_for_bot(&self, bot_id: i64) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.bot_id == bot_id)
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }

    async fn trades_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.created_at >= start && t.created_at < end)
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }
}

#[async_trait]
impl DecisionLog for MemoryStore {
    async fn append(&self, entry: &DecisionLogEntry) -> Result<()> {
        self.decisions.write().await.push(entry.clone());
        Ok(())
    }
}

/// Risk state that lives as long as the process
#[derive(Default)]
pub struct MemoryRiskStore {
    states: RwLock<HashMap<i64, RiskState>>,
}

impl MemoryRiskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskStateStore for MemoryRiskStore {
    async fn load(&self, bot_id: i64) -> Result<RiskState> {
        Ok(self
            .states
            .read()
            .await
            .get(&bot_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, bot_id: i64, state: &RiskState) -> Result<()> {
        self.states.write().await.insert(bot_id, state.clone());
        Ok(())
    }
}

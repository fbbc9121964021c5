use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BotError, Result};
use crate::indicators::MacdParams;
use crate::risk::RiskLimits;
use crate::strategy::{StrategyKind, StrategyParams};

/// Exchange dialects the client factory knows how to build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Bybit,
    Okx,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bybit" => Ok(ExchangeId::Bybit),
            "okx" | "okex" => Ok(ExchangeId::Okx),
            other => Err(BotError::UnsupportedExchange(other.to_string())),
        }
    }
}

/// Credential string that never shows up in logs or debug output
#[derive(Clone, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// API credentials owned by the configuration store.
///
/// Clients borrow the account while signing and never write it anywhere.
#[derive(Debug, Clone)]
pub struct ExchangeAccount {
    pub id: i64,
    pub exchange: ExchangeId,
    pub api_key: String,
    pub api_secret: Secret,
    pub passphrase: Option<Secret>,
    pub testnet: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BotType {
    Spot,
    Futures,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotType::Spot => "spot",
            BotType::Futures => "futures",
        }
    }
}

impl FromStr for BotType {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(BotType::Spot),
            "futures" | "swap" => Ok(BotType::Futures),
            other => Err(BotError::Config(format!("unknown bot type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSizing {
    /// Quote-currency amount spent per entry
    pub order_notional: f64,
    pub min_qty: f64,
    pub qty_step: f64,
    /// Capital the drawdown limit is measured against
    pub allocated_capital: f64,
    /// Base units per contract (futures bots only)
    pub contract_size: f64,
}

impl Default for PositionSizing {
    fn default() -> Self {
        Self {
            order_notional: 100.0,
            min_qty: 0.0001,
            qty_step: 0.0001,
            allocated_capital: 1000.0,
            contract_size: 1.0,
        }
    }
}

/// Per-bot configuration, read fresh every cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    pub id: i64,
    pub bot_type: BotType,
    pub account_id: i64,
    pub symbol: String,
    pub timeframe: String,
    pub strategy: StrategyKind,
    pub rsi_period: usize,
    pub ema_period: usize,
    pub rsi_buy_threshold: f64,
    pub rsi_sell_threshold: f64,
    pub macd: MacdParams,
    pub sizing: PositionSizing,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub max_daily_loss: f64,
    pub max_drawdown_percent: f64,
    pub max_losing_streak: u32,
    pub is_active: bool,
    pub dry_run: bool,
}

impl BotConfig {
    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            rsi_period: self.rsi_period,
            ema_period: self.ema_period,
            rsi_buy_threshold: self.rsi_buy_threshold,
            rsi_sell_threshold: self.rsi_sell_threshold,
            ..StrategyParams::default()
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_daily_loss: self.max_daily_loss,
            max_drawdown_percent: self.max_drawdown_percent,
            max_losing_streak: self.max_losing_streak,
            allocated_capital: self.sizing.allocated_capital,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        let params = StrategyParams::default();
        Self {
            id: 0,
            bot_type: BotType::Spot,
            account_id: 0,
            symbol: "BTCUSDT".to_string(),
            timeframe: "60".to_string(),
            strategy: StrategyKind::RsiEma,
            rsi_period: params.rsi_period,
            ema_period: params.ema_period,
            rsi_buy_threshold: params.rsi_buy_threshold,
            rsi_sell_threshold: params.rsi_sell_threshold,
            macd: MacdParams::default(),
            sizing: PositionSizing::default(),
            stop_loss_percent: 0.0,
            take_profit_percent: 0.0,
            max_daily_loss: 0.0,
            max_drawdown_percent: 0.0,
            max_losing_streak: 0,
            is_active: true,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id_parsing() {
        assert_eq!("bybit".parse::<ExchangeId>().unwrap(), ExchangeId::Bybit);
        assert_eq!(" OKX ".parse::<ExchangeId>().unwrap(), ExchangeId::Okx);

        let err = "kraken".parse::<ExchangeId>().unwrap_err();
        assert!(matches!(err, BotError::UnsupportedExchange(ref id) if id == "kraken"));
    }

    #[test]
    fn test_secret_is_redacted() {
        let account = ExchangeAccount {
            id: 1,
            exchange: ExchangeId::Okx,
            api_key: "key".to_string(),
            api_secret: Secret::new("super-secret"),
            passphrase: Some(Secret::new("phrase")),
            testnet: true,
        };

        let printed = format!("{:?}", account);
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("phrase\""));
        assert_eq!(account.api_secret.expose(), "super-secret");
    }

    #[test]
    fn test_bot_config_defaults_match_strategy_defaults() {
        let bot = BotConfig::default();
        assert_eq!(bot.rsi_period, 17);
        assert_eq!(bot.ema_period, 10);
        assert_eq!(bot.rsi_buy_threshold, 40.0);
        assert_eq!(bot.rsi_sell_threshold, 60.0);
        assert_eq!(bot.strategy_params().tolerance, 0.01);
    }
}

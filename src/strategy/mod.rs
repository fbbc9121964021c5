// Trading strategy module
pub mod macd_filter;
pub mod rsi_ema;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{BotError, Result};
use crate::indicators::IndicatorResult;
use crate::models::{BotConfig, Signal};

pub use macd_filter::MacdFilteredStrategy;
pub use rsi_ema::{classify, decide, RsiEmaStrategy, DEFAULT_TOLERANCE};

/// Thresholds for the RSI/EMA strategy family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub rsi_period: usize,
    pub ema_period: usize,
    pub rsi_buy_threshold: f64,
    pub rsi_sell_threshold: f64,
    /// How far price may sit from the EMA and still count as "near" it
    pub tolerance: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_period: 17,
            ema_period: 10,
            rsi_buy_threshold: 40.0,
            rsi_sell_threshold: 60.0,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Outcome of evaluating a strategy over one close series
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub signal: Signal,
    pub indicators: IndicatorResult,
    /// Last close
    pub price: f64,
    pub reason: String,
}

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Derive a signal from chronological closes
    fn evaluate(&self, closes: &[f64]) -> Result<Evaluation>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum closes required for this strategy
    fn min_closes(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RsiEma,
    RsiEmaMacd,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RsiEma => "rsi_ema",
            StrategyKind::RsiEmaMacd => "rsi_ema_macd",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsi_ema" | "rsi" => Ok(StrategyKind::RsiEma),
            "rsi_ema_macd" | "macd" => Ok(StrategyKind::RsiEmaMacd),
            other => Err(BotError::Config(format!("unknown strategy: {}", other))),
        }
    }
}

/// Build the strategy a bot is configured with
pub fn build_strategy(bot: &BotConfig) -> Box<dyn Strategy> {
    let base = RsiEmaStrategy::new(bot.strategy_params());
    match bot.strategy {
        StrategyKind::RsiEma => Box::new(base),
        StrategyKind::RsiEmaMacd => Box::new(MacdFilteredStrategy::new(base, bot.macd)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("rsi_ema".parse::<StrategyKind>().unwrap(), StrategyKind::RsiEma);
        assert_eq!("MACD".parse::<StrategyKind>().unwrap(), StrategyKind::RsiEmaMacd);
        assert!("grid".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_build_strategy_follows_config() {
        let mut bot = BotConfig::default();
        assert_eq!(build_strategy(&bot).name(), "rsi_ema");

        bot.strategy = StrategyKind::RsiEmaMacd;
        let strategy = build_strategy(&bot);
        assert_eq!(strategy.name(), "rsi_ema_macd");
        // Default MACD needs 26 + 9 - 1 closes, more than RSI(17)
        assert_eq!(strategy.min_closes(), 34);
    }
}

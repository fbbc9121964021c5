use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{BotError, Result};

pub mod bot;

pub use bot::{BotConfig, BotType, ExchangeAccount, ExchangeId, PositionSizing, Secret};

/// OHLCV candlestick, oldest first once returned by an exchange client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Closing prices of a candle slice, in the same order
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Trading signal
///
/// `Skip` is a risk-gate rejection and never comes out of a strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
    Skip,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
            Signal::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl FromStr for TradeSide {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(BotError::Storage(format!("invalid trade side: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Sent,
    Filled,
    PartiallyFilled,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Sent => "SENT",
            TradeStatus::Filled => "FILLED",
            TradeStatus::PartiallyFilled => "PARTIALLY_FILLED",
            TradeStatus::Failed => "FAILED",
        }
    }

    /// Statuses that make up the net open position
    pub fn counts_toward_position(&self) -> bool {
        matches!(
            self,
            TradeStatus::Pending | TradeStatus::Sent | TradeStatus::Filled
        )
    }
}

impl FromStr for TradeStatus {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TradeStatus::Pending),
            "SENT" => Ok(TradeStatus::Sent),
            "FILLED" => Ok(TradeStatus::Filled),
            "PARTIALLY_FILLED" => Ok(TradeStatus::PartiallyFilled),
            "FAILED" => Ok(TradeStatus::Failed),
            other => Err(BotError::Storage(format!("invalid trade status: {}", other))),
        }
    }
}

/// Trade record written to the trade-history store.
///
/// The pipeline creates a trade as `Pending` and applies exactly one update
/// from the immediate exchange response (`mark_sent` or `mark_failed`).
/// Later transitions belong to reconciliation outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub bot_id: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub exchange_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
    pub parent_id: Option<Uuid>,
}

impl Trade {
    pub fn pending(
        bot_id: i64,
        symbol: impl Into<String>,
        side: TradeSide,
        price: f64,
        quantity: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot_id,
            symbol: symbol.into(),
            side,
            price,
            quantity,
            fee: 0.0,
            status: TradeStatus::Pending,
            order_id: None,
            exchange_response: None,
            created_at: Utc::now(),
            filled_at: None,
            closed_at: None,
            realized_pnl: None,
            parent_id: None,
        }
    }

    pub fn mark_sent(&mut self, order_id: String, response: serde_json::Value) -> Result<()> {
        self.ensure_pending()?;
        self.status = TradeStatus::Sent;
        self.order_id = Some(order_id);
        self.exchange_response = Some(response);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: &str) -> Result<()> {
        self.ensure_pending()?;
        self.status = TradeStatus::Failed;
        self.exchange_response = Some(serde_json::json!({ "error": reason }));
        Ok(())
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.status != TradeStatus::Pending {
            return Err(BotError::InvalidParameter(format!(
                "trade {} already left PENDING ({})",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

/// One row of the append-only decision log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionLogEntry {
    pub bot_type: String,
    pub bot_id: i64,
    pub symbol: String,
    pub signal: Signal,
    pub price: Option<f64>,
    pub rsi: Option<f64>,
    pub ema: Option<f64>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Trade, TradeSide, TradeStatus};

/// Per-bot circuit breakers to prevent runaway losses.
///
/// A limit of zero disables that breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskLimits {
    /// Largest realized loss per UTC day, in quote currency
    pub max_daily_loss: f64,
    /// Largest drop from peak equity, in percent
    pub max_drawdown_percent: f64,
    pub max_losing_streak: u32,
    /// Equity base for the drawdown calculation
    pub allocated_capital: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: 0.0,
            max_drawdown_percent: 0.0,
            max_losing_streak: 0,
            allocated_capital: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    DailyLoss { loss: f64, limit: f64 },
    MaxDrawdown { drawdown_percent: f64, limit: f64 },
    LosingStreak { streak: u32, limit: u32 },
}

impl fmt::Display for CircuitBreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerTrip::DailyLoss { loss, limit } => {
                write!(f, "daily loss {:.2} reached limit {:.2}", loss, limit)
            }
            CircuitBreakerTrip::MaxDrawdown {
                drawdown_percent,
                limit,
            } => write!(
                f,
                "drawdown {:.2}% reached limit {:.2}%",
                drawdown_percent, limit
            ),
            CircuitBreakerTrip::LosingStreak { streak, limit } => {
                write!(f, "{} losing trades in a row (limit {})", streak, limit)
            }
        }
    }
}

/// Realized performance of one bot inside the current risk window
#[derive(Debug, Clone, PartialEq)]
pub struct TradingStats {
    pub daily_pnl: f64,
    pub drawdown_percent: f64,
    pub losing_streak: u32,
}

fn realized(trade: &Trade) -> Option<(DateTime<Utc>, f64)> {
    if trade.side != TradeSide::Sell || trade.status == TradeStatus::Failed {
        return None;
    }
    trade
        .realized_pnl
        .map(|pnl| (trade.closed_at.unwrap_or(trade.created_at), pnl))
}

impl TradingStats {
    /// Stats over SELL trades with a realized PnL, closed at or after
    /// `window_start`
    pub fn from_trades(
        trades: &[Trade],
        window_start: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        capital: f64,
    ) -> Self {
        let mut closed: Vec<(DateTime<Utc>, f64)> = trades
            .iter()
            .filter_map(realized)
            .filter(|(at, _)| window_start.map_or(true, |start| *at >= start))
            .collect();
        closed.sort_by_key(|(at, _)| *at);

        let today = now.date_naive();
        let daily_pnl = closed
            .iter()
            .filter(|(at, _)| at.date_naive() == today)
            .map(|(_, pnl)| pnl)
            .sum();

        let mut equity = capital;
        let mut peak = capital;
        for (_, pnl) in &closed {
            equity += pnl;
            peak = peak.max(equity);
        }
        let drawdown_percent = if peak > 0.0 {
            (peak - equity) / peak * 100.0
        } else {
            0.0
        };

        let losing_streak = closed
            .iter()
            .rev()
            .take_while(|(_, pnl)| *pnl < 0.0)
            .count() as u32;

        Self {
            daily_pnl,
            drawdown_percent,
            losing_streak,
        }
    }
}

impl RiskLimits {
    pub fn check(&self, stats: &TradingStats) -> Result<(), CircuitBreakerTrip> {
        // Check daily loss
        if self.max_daily_loss > 0.0 && -stats.daily_pnl >= self.max_daily_loss {
            return Err(CircuitBreakerTrip::DailyLoss {
                loss: -stats.daily_pnl,
                limit: self.max_daily_loss,
            });
        }

        // Check drawdown
        if self.max_drawdown_percent > 0.0 && stats.drawdown_percent >= self.max_drawdown_percent
        {
            return Err(CircuitBreakerTrip::MaxDrawdown {
                drawdown_percent: stats.drawdown_percent,
                limit: self.max_drawdown_percent,
            });
        }

        // Check consecutive losses
        if self.max_losing_streak > 0 && stats.losing_streak >= self.max_losing_streak {
            return Err(CircuitBreakerTrip::LosingStreak {
                streak: stats.losing_streak,
                limit: self.max_losing_streak,
            });
        }

        Ok(())
    }
}

/// Start of the next UTC calendar day
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Pause bookkeeping kept per bot between cycles
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskState {
    pub paused_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    /// Trades closed before this moment no longer count toward any breaker
    pub window_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Open,
    Paused {
        until: DateTime<Utc>,
        reason: String,
    },
}

impl RiskState {
    /// Evaluate the breakers for one cycle, updating the pause in place.
    ///
    /// An expired pause clears on the calendar-day boundary and restarts the
    /// risk window from that boundary. A fresh trip pauses the bot until the
    /// next UTC midnight.
    pub fn gate(&mut self, limits: &RiskLimits, trades: &[Trade], now: DateTime<Utc>) -> GateDecision {
        if let Some(until) = self.paused_until {
            if now < until {
                return GateDecision::Paused {
                    until,
                    reason: self
                        .pause_reason
                        .clone()
                        .unwrap_or_else(|| "paused".to_string()),
                };
            }
            tracing::info!("Risk pause expired at {}, resuming", until);
            self.paused_until = None;
            self.pause_reason = None;
            self.window_start = Some(until);
        }

        let stats = TradingStats::from_trades(
            trades,
            self.window_start,
            now,
            limits.allocated_capital,
        );

        match limits.check(&stats) {
            Ok(()) => GateDecision::Open,
            Err(trip) => {
                let until = next_utc_midnight(now);
                let reason = format!("Circuit breaker: {}", trip);
                tracing::warn!("{} - pausing until {}", reason, until);
                self.paused_until = Some(until);
                self.pause_reason = Some(reason.clone());
                GateDecision::Paused { until, reason }
            }
        }
    }

    /// Manual intervention: clear the pause and restart the risk window now
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.paused_until = None;
        self.pause_reason = None;
        self.window_start = Some(now);
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.map_or(false, |until| now < until)
    }
}

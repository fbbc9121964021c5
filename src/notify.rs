use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use crate::models::{Trade, TradeSide, TradeStatus};

/// Fire-and-forget sink for formatted messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Sends notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!(target: "signalbot::notify", "{}", message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Buy {
        bot_id: i64,
        symbol: String,
        price: f64,
        quantity: f64,
        order_id: Option<String>,
        dry_run: bool,
    },
    Sell {
        bot_id: i64,
        symbol: String,
        price: f64,
        quantity: f64,
        realized_pnl: Option<f64>,
        reason: String,
        dry_run: bool,
    },
    Skip {
        bot_id: i64,
        symbol: String,
        reason: String,
    },
    Error {
        bot_id: i64,
        message: String,
    },
    DailyStats(DailyStats),
}

fn mode(dry_run: bool) -> &'static str {
    if dry_run {
        " [dry-run]"
    } else {
        ""
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::Buy {
                bot_id,
                symbol,
                price,
                quantity,
                order_id,
                dry_run,
            } => {
                write!(
                    f,
                    "🟢 BUY {} {} @ {:.4} (bot #{}){}",
                    quantity,
                    symbol,
                    price,
                    bot_id,
                    mode(*dry_run)
                )?;
                if let Some(id) = order_id {
                    write!(f, " order {}", id)?;
                }
                Ok(())
            }
            NotificationEvent::Sell {
                bot_id,
                symbol,
                price,
                quantity,
                realized_pnl,
                reason,
                dry_run,
            } => {
                write!(
                    f,
                    "🔴 SELL {} {} @ {:.4} (bot #{}){} - {}",
                    quantity,
                    symbol,
                    price,
                    bot_id,
                    mode(*dry_run),
                    reason
                )?;
                if let Some(pnl) = realized_pnl {
                    write!(f, " | PnL {:+.2}", pnl)?;
                }
                Ok(())
            }
            NotificationEvent::Skip {
                bot_id,
                symbol,
                reason,
            } => write!(f, "⏸ SKIP {} (bot #{}) - {}", symbol, bot_id, reason),
            NotificationEvent::Error { bot_id, message } => {
                write!(f, "⚠️ Bot #{} error: {}", bot_id, message)
            }
            NotificationEvent::DailyStats(stats) => write!(f, "{}", stats),
        }
    }
}

/// Summary of one UTC day of trading across all bots
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub buys: usize,
    pub sells: usize,
    /// Orders the exchange accepted (SENT or later)
    pub accepted: usize,
    pub failed: usize,
    pub realized_pnl: f64,
    pub wins: usize,
    pub losses: usize,
}

impl DailyStats {
    /// Count trades created on `date`
    pub fn from_trades(date: NaiveDate, trades: &[Trade]) -> Self {
        let mut stats = DailyStats {
            date,
            buys: 0,
            sells: 0,
            accepted: 0,
            failed: 0,
            realized_pnl: 0.0,
            wins: 0,
            losses: 0,
        };

        for trade in trades.iter().filter(|t| t.created_at.date_naive() == date) {
            match trade.side {
                TradeSide::Buy => stats.buys += 1,
                TradeSide::Sell => stats.sells += 1,
            }
            match trade.status {
                TradeStatus::Failed => {
                    stats.failed += 1;
                    continue;
                }
                TradeStatus::Pending => {}
                _ => stats.accepted += 1,
            }
            if let Some(pnl) = trade.realized_pnl {
                stats.realized_pnl += pnl;
                if pnl > 0.0 {
                    stats.wins += 1;
                } else if pnl < 0.0 {
                    stats.losses += 1;
                }
            }
        }

        stats
    }

    pub fn win_rate(&self) -> Option<f64> {
        let closed = self.wins + self.losses;
        (closed > 0).then(|| self.wins as f64 / closed as f64 * 100.0)
    }
}

impl fmt::Display for DailyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "📊 Daily stats {}: {} buys, {} sells, {} accepted, {} failed, PnL {:+.2}",
            self.date, self.buys, self.sells, self.accepted, self.failed, self.realized_pnl
        )?;
        if let Some(rate) = self.win_rate() {
            write!(f, ", win rate {:.1}%", rate)?;
        }
        Ok(())
    }
}

/// Format and deliver one event
pub async fn send(notifier: &dyn Notifier, event: &NotificationEvent) {
    notifier.notify(&event.to_string()).await;
}

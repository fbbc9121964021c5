use uuid::Uuid;

use crate::error::Result;
use crate::exchange::OrderSize;
use crate::models::{BotConfig, BotType, ExchangeId, Signal, Trade};
use crate::risk::{can_buy, can_sell, net_position, open_lot, size_buy, size_sell, GateDecision, Sizing};
use crate::strategy::Evaluation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    StrategySell,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TakeProfit => "take-profit",
            ExitReason::StrategySell => "strategy sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Buy {
        quantity: f64,
    },
    Sell {
        quantity: f64,
        exit_reason: ExitReason,
        /// The BUY that opened the lot being closed
        parent_id: Option<Uuid>,
        entry_price: Option<f64>,
    },
    Hold,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }

    /// Signal recorded in the decision log
    pub fn signal(&self) -> Signal {
        match self.action {
            ExecutionAction::Buy { .. } => Signal::Buy,
            ExecutionAction::Sell { .. } => Signal::Sell,
            ExecutionAction::Hold => Signal::Hold,
            ExecutionAction::Skip => Signal::Skip,
        }
    }
}

/// Stop-loss / take-profit check against the open lot's entry price.
///
/// A percentage of 0 disables that side.
pub fn protective_exit(bot: &BotConfig, entry_price: f64, price: f64) -> Option<ExitReason> {
    if entry_price <= 0.0 {
        return None;
    }
    if bot.stop_loss_percent > 0.0 && price <= entry_price * (1.0 - bot.stop_loss_percent / 100.0) {
        return Some(ExitReason::StopLoss);
    }
    if bot.take_profit_percent > 0.0 && price >= entry_price * (1.0 + bot.take_profit_percent / 100.0) {
        return Some(ExitReason::TakeProfit);
    }
    None
}

fn sell_decision(
    bot: &BotConfig,
    trades: &[Trade],
    exit_reason: ExitReason,
    reason: String,
) -> Result<ExecutionDecision> {
    let net = net_position(trades);
    let lot = open_lot(trades);

    match size_sell(net, bot.sizing.min_qty, bot.sizing.qty_step)? {
        Sizing::Accepted { qty } => Ok(ExecutionDecision {
            action: ExecutionAction::Sell {
                quantity: qty,
                exit_reason,
                parent_id: lot.map(|t| t.id),
                entry_price: lot.map(|t| t.price),
            },
            reason,
        }),
        Sizing::Rejected { floored_qty, min_qty, .. } => Ok(ExecutionDecision::skip(format!(
            "Open lot {} is below minimum order size {} ({})",
            floored_qty, min_qty, reason
        ))),
    }
}

/// Turn a strategy evaluation into an action for one bot.
///
/// Order of checks: protective exits on the open lot, then the risk pause,
/// then the one-lot position gate, then sizing. Protective exits ignore the
/// pause since they only ever reduce exposure.
pub fn plan(
    bot: &BotConfig,
    evaluation: &Evaluation,
    trades: &[Trade],
    gate: &GateDecision,
    price: f64,
) -> Result<ExecutionDecision> {
    if let Some(lot) = open_lot(trades) {
        if let Some(exit) = protective_exit(bot, lot.price, price) {
            let reason = format!(
                "{} triggered: price {:.4} vs entry {:.4}",
                exit.as_str(),
                price,
                lot.price
            );
            return sell_decision(bot, trades, exit, reason);
        }
    }

    if let GateDecision::Paused { until, reason } = gate {
        return Ok(ExecutionDecision::skip(format!(
            "{} signal suppressed, {} (paused until {})",
            evaluation.signal, reason, until
        )));
    }

    let net = net_position(trades);
    match evaluation.signal {
        Signal::Buy => {
            if !can_buy(net) {
                return Ok(ExecutionDecision::skip(format!(
                    "BUY ignored: already holding {} (one lot per bot)",
                    net
                )));
            }
            match size_buy(
                price,
                bot.sizing.order_notional,
                bot.sizing.min_qty,
                bot.sizing.qty_step,
            )? {
                Sizing::Accepted { qty } => Ok(ExecutionDecision {
                    action: ExecutionAction::Buy { quantity: qty },
                    reason: evaluation.reason.clone(),
                }),
                Sizing::Rejected {
                    raw_qty, min_qty, ..
                } => Ok(ExecutionDecision::skip(format!(
                    "BUY ignored: {:.8} from notional {} is below minimum {}",
                    raw_qty, bot.sizing.order_notional, min_qty
                ))),
            }
        }
        Signal::Sell => {
            if !can_sell(net) {
                return Ok(ExecutionDecision::skip("SELL ignored: no open position"));
            }
            sell_decision(bot, trades, ExitReason::StrategySell, evaluation.reason.clone())
        }
        Signal::Hold => Ok(ExecutionDecision {
            action: ExecutionAction::Hold,
            reason: evaluation.reason.clone(),
        }),
        Signal::Skip => Ok(ExecutionDecision::skip(evaluation.reason.clone())),
    }
}

/// Express a base-currency quantity in the unit the venue expects.
///
/// OKX swaps trade whole contracts; `None` when the quantity is smaller
/// than one contract.
pub fn order_size(exchange: ExchangeId, bot: &BotConfig, quantity: f64) -> Option<OrderSize> {
    match (bot.bot_type, exchange) {
        (BotType::Futures, ExchangeId::Okx) => {
            let contract_size = bot.sizing.contract_size;
            if contract_size <= 0.0 {
                return None;
            }
            let contracts = (quantity / contract_size + 1e-9).floor();
            (contracts >= 1.0).then_some(OrderSize::Contracts(contracts as u64))
        }
        _ => Some(OrderSize::Base(quantity)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorResult;
    use crate::models::{PositionSizing, TradeSide, TradeStatus};
    use chrono::Utc;

    fn bot() -> BotConfig {
        BotConfig {
            id: 1,
            sizing: PositionSizing {
                order_notional: 105.0,
                min_qty: 1.0,
                qty_step: 1.0,
                ..PositionSizing::default()
            },
            ..BotConfig::default()
        }
    }

    fn evaluation(signal: Signal) -> Evaluation {
        Evaluation {
            signal,
            indicators: IndicatorResult {
                rsi: 50.0,
                ema: 50.0,
                macd: None,
            },
            price: 50.0,
            reason: format!("{} from strategy", signal),
        }
    }

    fn filled_buy(price: f64, qty: f64) -> Trade {
        let mut t = Trade::pending(1, "BTCUSDT", TradeSide::Buy, price, qty);
        t.status = TradeStatus::Filled;
        t
    }

    fn paused() -> GateDecision {
        GateDecision::Paused {
            until: Utc::now() + chrono::Duration::hours(1),
            reason: "Circuit breaker: daily loss".to_string(),
        }
    }

    #[test]
    fn test_buy_sized_from_notional() {
        let decision = plan(&bot(), &evaluation(Signal::Buy), &[], &GateDecision::Open, 50.0).unwrap();
        assert_eq!(decision.action, ExecutionAction::Buy { quantity: 2.0 });
        assert_eq!(decision.signal(), Signal::Buy);
    }

    #[test]
    fn test_buy_below_minimum_becomes_skip() {
        let mut bot = bot();
        bot.sizing.order_notional = 40.0;
        let decision = plan(&bot, &evaluation(Signal::Buy), &[], &GateDecision::Open, 50.0).unwrap();
        assert_eq!(decision.action, ExecutionAction::Skip);
        assert!(decision.reason.contains("below minimum"));
    }

    #[test]
    fn test_skip_buy_when_already_positioned() {
        let trades = vec![filled_buy(50.0, 2.0)];
        let decision = plan(&bot(), &evaluation(Signal::Buy), &trades, &GateDecision::Open, 50.0).unwrap();
        assert_eq!(decision.action, ExecutionAction::Skip);
        assert!(decision.reason.contains("one lot"));
    }

    #[test]
    fn test_skip_sell_when_no_position() {
        let decision = plan(&bot(), &evaluation(Signal::Sell), &[], &GateDecision::Open, 50.0).unwrap();
        assert_eq!(decision.action, ExecutionAction::Skip);
        assert!(decision.reason.contains("no open position"));
    }

    #[test]
    fn test_sell_closes_whole_lot() {
        let buy = filled_buy(48.0, 2.0);
        let buy_id = buy.id;
        let decision = plan(&bot(), &evaluation(Signal::Sell), &[buy], &GateDecision::Open, 50.0).unwrap();
        assert_eq!(
            decision.action,
            ExecutionAction::Sell {
                quantity: 2.0,
                exit_reason: ExitReason::StrategySell,
                parent_id: Some(buy_id),
                entry_price: Some(48.0),
            }
        );
    }

    #[test]
    fn test_pause_turns_every_signal_into_skip() {
        for signal in [Signal::Buy, Signal::Sell, Signal::Hold] {
            let decision = plan(&bot(), &evaluation(signal), &[], &paused(), 50.0).unwrap();
            assert_eq!(decision.action, ExecutionAction::Skip);
            assert!(decision.reason.contains("daily loss"));
        }
    }

    #[test]
    fn test_stop_loss_bypasses_pause() {
        let mut bot = bot();
        bot.stop_loss_percent = 5.0;
        let trades = vec![filled_buy(100.0, 2.0)];

        let decision = plan(&bot, &evaluation(Signal::Hold), &trades, &paused(), 94.0).unwrap();
        match decision.action {
            ExecutionAction::Sell {
                quantity,
                exit_reason,
                ..
            } => {
                assert_eq!(quantity, 2.0);
                assert_eq!(exit_reason, ExitReason::StopLoss);
            }
            other => panic!("expected stop-loss sell, got {:?}", other),
        }
    }

    #[test]
    fn test_protective_exit_thresholds() {
        let mut bot = bot();
        bot.stop_loss_percent = 5.0;
        bot.take_profit_percent = 10.0;

        assert_eq!(protective_exit(&bot, 100.0, 94.9), Some(ExitReason::StopLoss));
        assert_eq!(protective_exit(&bot, 100.0, 96.0), None);
        assert_eq!(protective_exit(&bot, 100.0, 110.5), Some(ExitReason::TakeProfit));

        bot.take_profit_percent = 0.0;
        assert_eq!(protective_exit(&bot, 100.0, 200.0), None);
    }

    #[test]
    fn test_hold_passes_through() {
        let decision = plan(&bot(), &evaluation(Signal::Hold), &[], &GateDecision::Open, 50.0).unwrap();
        assert_eq!(decision.action, ExecutionAction::Hold);
        assert_eq!(decision.signal(), Signal::Hold);
    }

    #[test]
    fn test_order_size_units() {
        let mut bot = bot();
        assert_eq!(order_size(ExchangeId::Bybit, &bot, 0.5), Some(OrderSize::Base(0.5)));

        bot.bot_type = BotType::Futures;
        bot.sizing.contract_size = 0.01;
        assert_eq!(order_size(ExchangeId::Okx, &bot, 0.057), Some(OrderSize::Contracts(5)));
        assert_eq!(order_size(ExchangeId::Okx, &bot, 0.005), None);
        assert_eq!(order_size(ExchangeId::Bybit, &bot, 0.057), Some(OrderSize::Base(0.057)));
    }
}

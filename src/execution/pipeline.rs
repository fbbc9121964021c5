use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use crate::decision_log::{self, DecisionLog};
use crate::error::{BotError, Result};
use crate::exchange::symbols::split_symbol;
use crate::exchange::{ClientPool, ExchangeClient, OrderRequest, OrderSize};
use crate::execution::executor::{order_size, plan, ExecutionAction, ExecutionDecision, ExitReason};
use crate::models::{closes, BotConfig, BotType, DecisionLogEntry, Signal, Trade, TradeSide, TradeStatus};
use crate::notify::{self, NotificationEvent, Notifier};
use crate::risk::{floor_to_step, GateDecision};
use crate::store::{ConfigStore, RiskStateStore, TradeStore};
use crate::strategy::{build_strategy, Evaluation};

/// Result of one bot cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub bot_id: i64,
    pub signal: Signal,
    pub reason: String,
    /// Trade written this cycle, if an order was attempted
    pub trade: Option<Trade>,
}

enum BalanceFit {
    /// Quantity to order, possibly cut down to the wallet
    Fits(f64),
    Short(String),
}

/// Collaborators one cycle needs, shared by every bot
pub struct Pipeline {
    config: Arc<dyn ConfigStore>,
    trades: Arc<dyn TradeStore>,
    decisions: Arc<dyn DecisionLog>,
    risk: Arc<dyn RiskStateStore>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<ClientPool>,
    candle_limit: usize,
    cycle_deadline: Duration,
}

/// Run `fut` unless the cycle deadline passes first
async fn before<T>(deadline: Instant, fut: impl Future<Output = Result<T>>) -> Result<T> {
    timeout_at(deadline, fut)
        .await
        .unwrap_or(Err(BotError::DeadlineExceeded))
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<dyn ConfigStore>,
        trades: Arc<dyn TradeStore>,
        decisions: Arc<dyn DecisionLog>,
        risk: Arc<dyn RiskStateStore>,
        notifier: Arc<dyn Notifier>,
        clients: Arc<ClientPool>,
        candle_limit: usize,
        cycle_deadline: Duration,
    ) -> Self {
        Self {
            config,
            trades,
            decisions,
            risk,
            notifier,
            clients,
            candle_limit,
            cycle_deadline,
        }
    }

    pub fn config_store(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    pub fn trade_store(&self) -> &Arc<dyn TradeStore> {
        &self.trades
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Clear a bot's circuit-breaker pause and restart its risk window
    pub async fn resume(&self, bot_id: i64) -> Result<()> {
        let mut state = self.risk.load(bot_id).await?;
        state.resume(Utc::now());
        self.risk.save(bot_id, &state).await?;
        tracing::info!("▶️ Bot {} resumed manually", bot_id);
        Ok(())
    }

    /// One full evaluate-and-execute pass for a bot.
    ///
    /// Market data and order placement share one deadline. Errors that stop
    /// the cycle are recorded in the decision log before being returned.
    pub async fn run_cycle(&self, bot_id: i64) -> Result<CycleOutcome> {
        let deadline = Instant::now() + self.cycle_deadline;

        let bot = self
            .config
            .bot(bot_id)
            .await?
            .ok_or_else(|| BotError::Config(format!("bot {} not found", bot_id)))?;
        if !bot.is_active {
            tracing::debug!("Bot {} is inactive, skipping", bot_id);
            return Ok(CycleOutcome {
                bot_id,
                signal: Signal::Skip,
                reason: "Bot is inactive".to_string(),
                trade: None,
            });
        }

        let account = self
            .config
            .exchange_account(bot.account_id)
            .await?
            .ok_or_else(|| {
                BotError::Config(format!(
                    "exchange account {} for bot {} not found",
                    bot.account_id, bot.id
                ))
            })?;
        let client = self.clients.client(&account, bot.bot_type).await?;

        let strategy = build_strategy(&bot);
        let limit = self.candle_limit.max(strategy.min_closes());

        let evaluation = match before(
            deadline,
            client.get_candles(&bot.symbol, &bot.timeframe, limit),
        )
        .await
        .and_then(|candles| strategy.evaluate(&closes(&candles)))
        {
            Ok(evaluation) => evaluation,
            Err(e) => {
                let reason = match e {
                    BotError::DeadlineExceeded => {
                        "Cycle deadline exceeded while fetching market data".to_string()
                    }
                    ref other => format!("Market data unavailable: {}", other),
                };
                tracing::warn!("Bot {} {}: {}", bot.id, bot.symbol, reason);
                self.log_decision(&bot, Signal::Skip, None, &reason).await;
                return Err(e);
            }
        };

        tracing::debug!(
            "Bot {} {} via {}: {} (rsi={:.2}, ema={:.2})",
            bot.id,
            bot.symbol,
            strategy.name(),
            evaluation.signal,
            evaluation.indicators.rsi,
            evaluation.indicators.ema
        );

        let price = self.sizing_price(client.as_ref(), &bot, &evaluation, deadline).await;
        let history = self.trades.trades_for_bot(bot.id).await?;

        let now = Utc::now();
        let mut risk_state = self.risk.load(bot.id).await?;
        let before_gate = risk_state.clone();
        let gate = risk_state.gate(&bot.risk_limits(), &history, now);
        if risk_state != before_gate {
            self.risk.save(bot.id, &risk_state).await?;
            if let GateDecision::Paused { reason, until } = &gate {
                notify::send(
                    self.notifier.as_ref(),
                    &NotificationEvent::Error {
                        bot_id: bot.id,
                        message: format!("{} - paused until {}", reason, until),
                    },
                )
                .await;
            }
        }

        let decision = plan(&bot, &evaluation, &history, &gate, price)?;

        match decision.action {
            ExecutionAction::Hold | ExecutionAction::Skip => {
                self.log_decision(&bot, decision.signal(), Some((&evaluation, price)), &decision.reason)
                    .await;
                if decision.action == ExecutionAction::Skip
                    && matches!(evaluation.signal, Signal::Buy | Signal::Sell)
                {
                    notify::send(
                        self.notifier.as_ref(),
                        &NotificationEvent::Skip {
                            bot_id: bot.id,
                            symbol: bot.symbol.clone(),
                            reason: decision.reason.clone(),
                        },
                    )
                    .await;
                }
                tracing::info!("Bot {} {}: {} - {}", bot.id, bot.symbol, decision.signal(), decision.reason);
                Ok(CycleOutcome {
                    bot_id: bot.id,
                    signal: decision.signal(),
                    reason: decision.reason,
                    trade: None,
                })
            }
            ExecutionAction::Buy { .. } | ExecutionAction::Sell { .. } => {
                self.execute(client.as_ref(), &bot, &evaluation, decision, price, deadline)
                    .await
            }
        }
    }

    /// Live ticker for sizing, falling back to the last close
    async fn sizing_price(
        &self,
        client: &dyn ExchangeClient,
        bot: &BotConfig,
        evaluation: &Evaluation,
        deadline: Instant,
    ) -> f64 {
        match before(deadline, client.get_price(&bot.symbol)).await {
            Ok(price) if price > 0.0 => price,
            Ok(price) => {
                tracing::warn!("Bot {}: ticker returned {}, using last close", bot.id, price);
                evaluation.price
            }
            Err(e) => {
                tracing::warn!("Bot {}: ticker unavailable ({}), using last close", bot.id, e);
                evaluation.price
            }
        }
    }

    /// Spot orders need the coin they spend; `Some(reason)` when short
    /// Live spot orders must fit the wallet. A BUY needs its quote cost. A
    /// SELL is cut to the base coin actually held, since the entry fee was
    /// taken in that coin, and is short only when what remains is under
    /// `min_qty`.
    async fn fit_to_balance(
        &self,
        client: &dyn ExchangeClient,
        bot: &BotConfig,
        side: TradeSide,
        quantity: f64,
        price: f64,
        deadline: Instant,
    ) -> Result<BalanceFit> {
        if bot.bot_type != BotType::Spot {
            return Ok(BalanceFit::Fits(quantity));
        }
        let Some((base, quote)) = split_symbol(&bot.symbol) else {
            tracing::debug!("Bot {}: cannot split {}, skipping balance check", bot.id, bot.symbol);
            return Ok(BalanceFit::Fits(quantity));
        };

        match side {
            TradeSide::Buy => {
                let needed = quantity * price;
                let available = before(deadline, client.get_balance(&quote)).await?;
                if available + 1e-12 < needed {
                    return Ok(BalanceFit::Short(format!(
                        "Insufficient {} balance: need {:.8}, have {:.8}",
                        quote, needed, available
                    )));
                }
                Ok(BalanceFit::Fits(quantity))
            }
            TradeSide::Sell => {
                let available = before(deadline, client.get_balance(&base)).await?;
                let sellable = floor_to_step(quantity.min(available.max(0.0)), bot.sizing.qty_step);
                if sellable < bot.sizing.min_qty || sellable <= 0.0 {
                    return Ok(BalanceFit::Short(format!(
                        "Insufficient {} balance: need {:.8}, have {:.8}",
                        base, bot.sizing.min_qty, available
                    )));
                }
                if sellable < quantity {
                    tracing::info!(
                        "Bot {}: selling {} of {} {}, the wallet holds {}",
                        bot.id,
                        sellable,
                        quantity,
                        base,
                        available
                    );
                }
                Ok(BalanceFit::Fits(sellable))
            }
        }
    }

    async fn execute(
        &self,
        client: &dyn ExchangeClient,
        bot: &BotConfig,
        evaluation: &Evaluation,
        decision: ExecutionDecision,
        price: f64,
        deadline: Instant,
    ) -> Result<CycleOutcome> {
        let (side, quantity, parent_id, entry_price, exit_reason) = match decision.action {
            ExecutionAction::Buy { quantity } => (TradeSide::Buy, quantity, None, None, None),
            ExecutionAction::Sell {
                quantity,
                exit_reason,
                parent_id,
                entry_price,
            } => (TradeSide::Sell, quantity, parent_id, entry_price, Some(exit_reason)),
            ExecutionAction::Hold | ExecutionAction::Skip => {
                return Err(BotError::InvalidParameter(
                    "execute called without an order".to_string(),
                ))
            }
        };

        let skip = |reason: String| CycleOutcome {
            bot_id: bot.id,
            signal: Signal::Skip,
            reason,
            trade: None,
        };

        // The lot this order opens or closes; a spot SELL may order less
        let lot_quantity = quantity;
        let mut quantity = quantity;
        if !bot.dry_run {
            let fit = match self
                .fit_to_balance(client, bot, side, quantity, price, deadline)
                .await
            {
                Ok(fit) => fit,
                Err(e) => BalanceFit::Short(format!("Balance check failed: {}", e)),
            };
            match fit {
                BalanceFit::Fits(fitted) => quantity = fitted,
                BalanceFit::Short(reason) => {
                    tracing::warn!("Bot {} {}: {}", bot.id, bot.symbol, reason);
                    self.log_decision(bot, Signal::Skip, Some((evaluation, price)), &reason).await;
                    notify::send(
                        self.notifier.as_ref(),
                        &NotificationEvent::Skip {
                            bot_id: bot.id,
                            symbol: bot.symbol.clone(),
                            reason: reason.clone(),
                        },
                    )
                    .await;
                    return Ok(skip(reason));
                }
            }
        }

        let Some(size) = order_size(client.exchange(), bot, quantity) else {
            let reason = format!(
                "{} ignored: {} is less than one contract of {}",
                side.as_str(),
                quantity,
                bot.sizing.contract_size
            );
            self.log_decision(bot, Signal::Skip, Some((evaluation, price)), &reason).await;
            return Ok(skip(reason));
        };
        // Record the quantity actually ordered
        let quantity = match size {
            OrderSize::Contracts(n) => n as f64 * bot.sizing.contract_size,
            other => other.amount(),
        };

        let mut trade = Trade::pending(bot.id, &bot.symbol, side, price, quantity);
        trade.parent_id = parent_id;
        if side == TradeSide::Sell && bot.bot_type == BotType::Spot && quantity < lot_quantity {
            // The SELL closes the whole lot; the coin missing from the wallet
            // went to the entry fee and is booked as fee in the quote coin
            trade.quantity = lot_quantity;
            trade.fee = (lot_quantity - quantity) * price;
        }
        if let Some(entry) = entry_price {
            // Estimate until reconciliation records the real fill
            trade.realized_pnl = Some(price * quantity - entry * trade.quantity);
        }
        self.trades.insert_trade(&trade).await?;

        let request = OrderRequest::market(&bot.symbol, side, size);
        let mut reason = decision.reason.clone();

        if bot.dry_run {
            trade.mark_sent(
                format!("dry-run-{}", request.client_order_id),
                json!({
                    "dry_run": true,
                    "client_order_id": request.client_order_id,
                    "size": size.amount(),
                }),
            )?;
            reason = format!("{} [dry-run]", reason);
        } else {
            match before(deadline, client.place_market_order(&request)).await {
                Ok(ack) => {
                    tracing::info!(
                        "✓ Bot {} {} {} {} accepted as {}",
                        bot.id,
                        side.as_str(),
                        quantity,
                        bot.symbol,
                        ack.order_id
                    );
                    trade.mark_sent(ack.order_id, ack.raw)?;
                }
                Err(e) => {
                    let failure = match e {
                        BotError::DeadlineExceeded => "Cycle deadline exceeded during order placement".to_string(),
                        ref other => format!("Order failed: {}", other),
                    };
                    tracing::error!("✗ Bot {} {} {}: {}", bot.id, side.as_str(), bot.symbol, failure);
                    trade.mark_failed(&failure)?;
                    reason = failure;
                }
            }
        }

        self.trades.update_trade(&trade).await?;

        let signal = match side {
            TradeSide::Buy => Signal::Buy,
            TradeSide::Sell => Signal::Sell,
        };
        self.log_decision(bot, signal, Some((evaluation, price)), &reason).await;

        let event = if trade.status == TradeStatus::Failed {
            NotificationEvent::Error {
                bot_id: bot.id,
                message: reason.clone(),
            }
        } else {
            match side {
                TradeSide::Buy => NotificationEvent::Buy {
                    bot_id: bot.id,
                    symbol: bot.symbol.clone(),
                    price,
                    quantity,
                    order_id: trade.order_id.clone(),
                    dry_run: bot.dry_run,
                },
                TradeSide::Sell => NotificationEvent::Sell {
                    bot_id: bot.id,
                    symbol: bot.symbol.clone(),
                    price,
                    quantity,
                    realized_pnl: trade.realized_pnl,
                    reason: exit_reason
                        .unwrap_or(ExitReason::StrategySell)
                        .as_str()
                        .to_string(),
                    dry_run: bot.dry_run,
                },
            }
        };
        notify::send(self.notifier.as_ref(), &event).await;

        Ok(CycleOutcome {
            bot_id: bot.id,
            signal,
            reason,
            trade: Some(trade),
        })
    }

    async fn log_decision(
        &self,
        bot: &BotConfig,
        signal: Signal,
        evaluated: Option<(&Evaluation, f64)>,
        reason: &str,
    ) {
        let entry = DecisionLogEntry {
            bot_type: bot.bot_type.as_str().to_string(),
            bot_id: bot.id,
            symbol: bot.symbol.clone(),
            signal,
            price: evaluated.map(|(_, price)| price),
            rsi: evaluated.map(|(e, _)| e.indicators.rsi),
            ema: evaluated.map(|(e, _)| e.indicators.ema),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        decision_log::record(self.decisions.as_ref(), &entry).await;
    }
}

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::Result;
use crate::execution::pipeline::{CycleOutcome, Pipeline};
use crate::models::Signal;
use crate::notify::{self, DailyStats, NotificationEvent};

/// What happened to each bot during one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub started: usize,
    pub buys: usize,
    pub sells: usize,
    pub holds: usize,
    pub skips: usize,
    pub errors: usize,
    /// Bots whose previous cycle was still running
    pub busy: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: &Result<CycleOutcome>) {
        match outcome {
            Ok(o) => match o.signal {
                Signal::Buy => self.buys += 1,
                Signal::Sell => self.sells += 1,
                Signal::Hold => self.holds += 1,
                Signal::Skip => self.skips += 1,
            },
            Err(_) => self.errors += 1,
        }
    }
}

/// Runs every active bot once per tick.
///
/// Bots run in parallel up to `max_concurrent`. A bot whose previous cycle
/// has not finished is skipped for that tick.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    tick_interval: Duration,
    permits: Arc<Semaphore>,
    bot_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    stats_day: Mutex<Option<NaiveDate>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, tick_interval: Duration, max_concurrent: usize) -> Self {
        Self {
            pipeline,
            tick_interval,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            bot_locks: Mutex::new(HashMap::new()),
            stats_day: Mutex::new(None),
        }
    }

    async fn try_lock_bot(&self, bot_id: i64) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .bot_locks
            .lock()
            .await
            .entry(bot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().ok()
    }

    /// Forget locks of bots that left the active set. A lock still held by a
    /// running cycle stays until that cycle ends.
    async fn prune_locks(&self, active: &HashSet<i64>) {
        self.bot_locks
            .lock()
            .await
            .retain(|id, lock| active.contains(id) || Arc::strong_count(lock) > 1);
    }

    /// One cycle for every active bot, waiting for all of them to finish
    pub async fn run_tick(self: &Arc<Self>) -> Result<TickSummary> {
        let bots = self.pipeline.config_store().active_bots().await?;
        let active: HashSet<i64> = bots.iter().map(|bot| bot.id).collect();
        self.prune_locks(&active).await;
        let mut summary = TickSummary::default();
        let mut tasks = JoinSet::new();

        for bot in bots {
            let Some(guard) = self.try_lock_bot(bot.id).await else {
                tracing::warn!("Bot {} still running its previous cycle, skipping tick", bot.id);
                summary.busy += 1;
                continue;
            };

            let permits = self.permits.clone();
            let pipeline = self.pipeline.clone();
            summary.started += 1;
            tasks.spawn(async move {
                let _guard = guard;
                let _permit = permits.acquire_owned().await;
                let outcome = pipeline.run_cycle(bot.id).await;
                (bot.id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((bot_id, outcome)) => {
                    if let Err(e) = &outcome {
                        tracing::error!("Bot {} cycle failed: {}", bot_id, e);
                        notify::send(
                            self.pipeline.notifier().as_ref(),
                            &NotificationEvent::Error {
                                bot_id,
                                message: e.to_string(),
                            },
                        )
                        .await;
                    }
                    summary.record(&outcome);
                }
                Err(e) => {
                    tracing::error!("Bot task aborted: {}", e);
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Emit yesterday's stats the first time a tick lands on a new UTC day
    pub async fn maybe_send_daily_stats(&self, now: DateTime<Utc>) -> Result<Option<DailyStats>> {
        let today = now.date_naive();
        let mut last = self.stats_day.lock().await;
        let Some(previous) = *last else {
            *last = Some(today);
            return Ok(None);
        };
        if previous == today {
            return Ok(None);
        }

        let day = today - ChronoDuration::days(1);
        let start = day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let end = start + ChronoDuration::days(1);
        let trades = self.pipeline.trade_store().trades_between(start, end).await?;
        let stats = DailyStats::from_trades(day, &trades);

        notify::send(
            self.pipeline.notifier().as_ref(),
            &NotificationEvent::DailyStats(stats.clone()),
        )
        .await;
        *last = Some(today);
        Ok(Some(stats))
    }

    /// Tick forever. Each tick runs in its own task so a slow tick never
    /// delays the next one; busy bots are skipped instead.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "🔄 Scheduler started: tick every {}s",
            self.tick_interval.as_secs()
        );

        loop {
            ticker.tick().await;

            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.maybe_send_daily_stats(Utc::now()).await {
                    tracing::warn!("Failed to build daily stats: {}", e);
                }

                match scheduler.run_tick().await {
                    Ok(summary) => tracing::info!(
                        "✅ Tick done: {} run, {} buy, {} sell, {} hold, {} skip, {} error, {} busy",
                        summary.started,
                        summary.buys,
                        summary.sells,
                        summary.holds,
                        summary.skips,
                        summary.errors,
                        summary.busy
                    ),
                    Err(e) => tracing::error!("Tick failed before any bot ran: {}", e),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_log::DecisionLog;
    use crate::exchange::{
        ClientPool, ExchangeClient, ExchangeSettings, OrderAck, OrderInfo, OrderRequest,
    };
    use crate::models::{BotConfig, Candle, ExchangeAccount, ExchangeId, Secret, Trade, TradeSide, TradeStatus};
    use crate::notify::Notifier;
    use crate::store::{MemoryRiskStore, MemoryStore, TradeStore};
    use crate::BotError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Serves a sideways series after `delay`, which evaluates to HOLD
    struct SlowExchange {
        delay: Duration,
    }

    #[async_trait]
    impl ExchangeClient for SlowExchange {
        fn exchange(&self) -> ExchangeId {
            ExchangeId::Bybit
        }

        async fn get_price(&self, _symbol: &str) -> Result<f64> {
            Ok(100.0)
        }

        async fn get_candles(&self, _symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
            tokio::time::sleep(self.delay).await;
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Ok((0..limit)
                .map(|i| {
                    let close = if i % 2 == 0 { 100.0 } else { 101.0 };
                    Candle {
                        open_time: start + ChronoDuration::hours(i as i64),
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: 1.0,
                    }
                })
                .collect())
        }

        async fn get_balance(&self, _coin: &str) -> Result<f64> {
            Ok(0.0)
        }

        async fn place_market_order(&self, _order: &OrderRequest) -> Result<OrderAck> {
            Err(BotError::InvalidParameter("not expected".to_string()))
        }

        async fn get_order(&self, _symbol: &str, _order_id: &str) -> Result<OrderInfo> {
            Err(BotError::InvalidParameter("not expected".to_string()))
        }
    }

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Collect {
        async fn notify(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    async fn scheduler(bots: &[i64], delay: Duration) -> (Arc<Scheduler>, Arc<MemoryStore>, Arc<Collect>) {
        let store = Arc::new(MemoryStore::new());
        store
            .add_account(ExchangeAccount {
                id: 1,
                exchange: ExchangeId::Bybit,
                api_key: "key".to_string(),
                api_secret: Secret::new("secret"),
                passphrase: None,
                testnet: true,
            })
            .await;
        for &id in bots {
            store
                .add_bot(BotConfig {
                    id,
                    account_id: 1,
                    ..BotConfig::default()
                })
                .await;
        }
        // Account 2 does not exist
        store
            .add_bot(BotConfig {
                id: 99,
                account_id: 2,
                ..BotConfig::default()
            })
            .await;

        let notifier = Arc::new(Collect::default());
        let pool = ClientPool::with_builder(ExchangeSettings::default(), move |_, _, _| {
            Ok(Arc::new(SlowExchange { delay }) as Arc<dyn ExchangeClient>)
        });
        let pipeline = Pipeline::new(
            store.clone(),
            store.clone(),
            store.clone() as Arc<dyn DecisionLog>,
            Arc::new(MemoryRiskStore::new()),
            notifier.clone(),
            Arc::new(pool),
            50,
            Duration::from_secs(30),
        );
        let scheduler = Arc::new(Scheduler::new(Arc::new(pipeline), Duration::from_secs(60), 2));
        (scheduler, store, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_runs_every_active_bot() {
        let (scheduler, store, notifier) = scheduler(&[1, 2, 3], Duration::from_secs(1)).await;

        let summary = scheduler.run_tick().await.unwrap();
        assert_eq!(summary.started, 4);
        assert_eq!(summary.holds, 3);
        // The bot with a missing account fails without stopping the others
        assert_eq!(summary.errors, 1);
        assert_eq!(store.decisions().await.len(), 3);
        assert!(notifier.0.lock().unwrap().iter().any(|m| m.contains("#99")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_bot_is_skipped() {
        let (scheduler, _store, _notifier) = scheduler(&[1], Duration::from_secs(20)).await;

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_tick().await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;

        let second = scheduler.run_tick().await.unwrap();
        assert_eq!(second.busy, 1);
        assert_eq!(second.started, 1);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.holds, 1);
        assert_eq!(first.busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_of_inactive_bots_are_dropped() {
        let (scheduler, store, _notifier) = scheduler(&[1, 2, 3], Duration::from_secs(1)).await;

        scheduler.run_tick().await.unwrap();
        assert_eq!(scheduler.bot_locks.lock().await.len(), 4);

        for id in [2, 3] {
            store
                .add_bot(BotConfig {
                    id,
                    account_id: 1,
                    is_active: false,
                    ..BotConfig::default()
                })
                .await;
        }
        let summary = scheduler.run_tick().await.unwrap();
        assert_eq!(summary.started, 2);

        let mut tracked: Vec<i64> = scheduler.bot_locks.lock().await.keys().copied().collect();
        tracked.sort();
        assert_eq!(tracked, vec![1, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_bot_keeps_its_lock_after_deactivation() {
        let (scheduler, store, _notifier) = scheduler(&[1], Duration::from_secs(20)).await;

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_tick().await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;

        store
            .add_bot(BotConfig {
                id: 1,
                account_id: 1,
                is_active: false,
                ..BotConfig::default()
            })
            .await;
        scheduler.run_tick().await.unwrap();
        // Still mid-cycle; a fresh lock would let a reactivated bot overlap it
        assert!(scheduler.bot_locks.lock().await.contains_key(&1));

        first.await.unwrap().unwrap();
        scheduler.run_tick().await.unwrap();
        assert!(!scheduler.bot_locks.lock().await.contains_key(&1));
    }

    #[tokio::test]
    async fn test_daily_stats_once_per_day() {
        let (scheduler, store, notifier) = scheduler(&[], Duration::ZERO).await;

        let mut sell = Trade::pending(1, "BTCUSDT", TradeSide::Sell, 110.0, 1.0);
        sell.status = TradeStatus::Sent;
        sell.realized_pnl = Some(10.0);
        sell.created_at = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        store.insert_trade(&sell).await.unwrap();

        let day_one = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        assert!(scheduler.maybe_send_daily_stats(day_one).await.unwrap().is_none());

        let day_two = Utc.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap();
        let stats = scheduler.maybe_send_daily_stats(day_two).await.unwrap().unwrap();
        assert_eq!(stats.sells, 1);
        assert_eq!(stats.realized_pnl, 10.0);

        let later = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        assert!(scheduler.maybe_send_daily_stats(later).await.unwrap().is_none());
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }
}

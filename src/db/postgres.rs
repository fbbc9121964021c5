use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::decision_log::DecisionLog;
use crate::error::{BotError, Result};
use crate::indicators::MacdParams;
use crate::models::{
    BotConfig, DecisionLogEntry, ExchangeAccount, PositionSizing, Secret, Trade,
};
use crate::store::{ConfigStore, TradeStore};

const BOT_COLUMNS: &str = r#"
    id, bot_type, account_id, symbol, timeframe, strategy,
    rsi_period, ema_period, rsi_buy_threshold, rsi_sell_threshold,
    macd_fast, macd_slow, macd_signal,
    order_notional, min_qty, qty_step, allocated_capital, contract_size,
    stop_loss_percent, take_profit_percent,
    max_daily_loss, max_drawdown_percent, max_losing_streak,
    is_active, dry_run
"#;

const TRADE_COLUMNS: &str = r#"
    id, bot_id, symbol, side, price, quantity, fee, status, order_id,
    exchange_response, created_at, filled_at, closed_at, realized_pnl, parent_id
"#;

/// Postgres-backed configuration, trade history and decision log
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::try_from(value)
        .map_err(|e| BotError::Storage(format!("cannot store {} as NUMERIC: {}", value, e)))
}

fn opt_decimal(value: Option<f64>) -> Result<Option<Decimal>> {
    value.map(to_decimal).transpose()
}

fn to_f64(value: Decimal) -> Result<f64> {
    value
        .to_string()
        .parse()
        .map_err(|e| BotError::Storage(format!("invalid NUMERIC {}: {}", value, e)))
}

fn num(row: &PgRow, column: &str) -> Result<f64> {
    to_f64(row.try_get::<Decimal, _>(column)?)
}

fn opt_num(row: &PgRow, column: &str) -> Result<Option<f64>> {
    row.try_get::<Option<Decimal>, _>(column)?
        .map(to_f64)
        .transpose()
}

fn non_negative(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| BotError::Storage(format!("{} must be >= 0, got {}", column, value)))
}

fn count(row: &PgRow, column: &str) -> Result<usize> {
    let value: i32 = row.try_get(column)?;
    Ok(non_negative(column, value)? as usize)
}

/// Keep the bots that decoded; one bad row must not stop every other bot
fn loadable_bots(rows: impl IntoIterator<Item = (Option<i64>, Result<BotConfig>)>) -> Vec<BotConfig> {
    rows.into_iter()
        .filter_map(|(id, decoded)| match decoded {
            Ok(bot) => Some(bot),
            Err(e) => {
                match id {
                    Some(id) => tracing::warn!("Skipping bot {}: {}", id, e),
                    None => tracing::warn!("Skipping unreadable bot row: {}", e),
                }
                None
            }
        })
        .collect()
}

fn bot_from_row(row: &PgRow) -> Result<BotConfig> {
    let bot_type: String = row.try_get("bot_type")?;
    let strategy: String = row.try_get("strategy")?;
    let max_losing_streak: i32 = row.try_get("max_losing_streak")?;

    Ok(BotConfig {
        id: row.try_get("id")?,
        bot_type: bot_type.parse()?,
        account_id: row.try_get("account_id")?,
        symbol: row.try_get("symbol")?,
        timeframe: row.try_get("timeframe")?,
        strategy: strategy.parse()?,
        rsi_period: count(row, "rsi_period")?,
        ema_period: count(row, "ema_period")?,
        rsi_buy_threshold: num(row, "rsi_buy_threshold")?,
        rsi_sell_threshold: num(row, "rsi_sell_threshold")?,
        macd: MacdParams {
            fast: count(row, "macd_fast")?,
            slow: count(row, "macd_slow")?,
            signal: count(row, "macd_signal")?,
        },
        sizing: PositionSizing {
            order_notional: num(row, "order_notional")?,
            min_qty: num(row, "min_qty")?,
            qty_step: num(row, "qty_step")?,
            allocated_capital: num(row, "allocated_capital")?,
            contract_size: num(row, "contract_size")?,
        },
        stop_loss_percent: num(row, "stop_loss_percent")?,
        take_profit_percent: num(row, "take_profit_percent")?,
        max_daily_loss: num(row, "max_daily_loss")?,
        max_drawdown_percent: num(row, "max_drawdown_percent")?,
        max_losing_streak: non_negative("max_losing_streak", max_losing_streak)?,
        is_active: row.try_get("is_active")?,
        dry_run: row.try_get("dry_run")?,
    })
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;

    Ok(Trade {
        id: row.try_get("id")?,
        bot_id: row.try_get("bot_id")?,
        symbol: row.try_get("symbol")?,
        side: side.parse()?,
        price: num(row, "price")?,
        quantity: num(row, "quantity")?,
        fee: num(row, "fee")?,
        status: status.parse()?,
        order_id: row.try_get("order_id")?,
        exchange_response: row.try_get("exchange_response")?,
        created_at: row.try_get("created_at")?,
        filled_at: row.try_get("filled_at")?,
        closed_at: row.try_get("closed_at")?,
        realized_pnl: opt_num(row, "realized_pnl")?,
        parent_id: row.try_get::<Option<Uuid>, _>("parent_id")?,
    })
}

#[async_trait]
impl ConfigStore for PostgresStore {
    async fn active_bots(&self) -> Result<Vec<BotConfig>> {
        let sql = format!(
            "SELECT {} FROM bots WHERE is_active = TRUE ORDER BY id ASC",
            BOT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(loadable_bots(
            rows.iter()
                .map(|row| (row.try_get::<i64, _>("id").ok(), bot_from_row(row))),
        ))
    }

    async fn bot(&self, bot_id: i64) -> Result<Option<BotConfig>> {
        let sql = format!("SELECT {} FROM bots WHERE id = $1", BOT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bot_from_row).transpose()
    }

    async fn exchange_account(&self, account_id: i64) -> Result<Option<ExchangeAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, exchange, api_key, api_secret, passphrase, testnet
            FROM exchange_accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let exchange: String = row.try_get("exchange")?;
        let api_secret: String = row.try_get("api_secret")?;
        let passphrase: Option<String> = row.try_get("passphrase")?;

        Ok(Some(ExchangeAccount {
            id: row.try_get("id")?,
            exchange: exchange.parse()?,
            api_key: row.try_get("api_key")?,
            api_secret: Secret::new(api_secret),
            passphrase: passphrase.filter(|p| !p.is_empty()).map(Secret::new),
            testnet: row.try_get("testnet")?,
        }))
    }
}

#[async_trait]
impl TradeStore for PostgresStore {
    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, bot_id, symbol, side, price, quantity, fee, status, order_id,
                exchange_response, created_at, filled_at, closed_at, realized_pnl, parent_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(trade.id)
        .bind(trade.bot_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(to_decimal(trade.price)?)
        .bind(to_decimal(trade.quantity)?)
        .bind(to_decimal(trade.fee)?)
        .bind(trade.status.as_str())
        .bind(&trade.order_id)
        .bind(&trade.exchange_response)
        .bind(trade.created_at)
        .bind(trade.filled_at)
        .bind(trade.closed_at)
        .bind(opt_decimal(trade.realized_pnl)?)
        .bind(trade.parent_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved trade {} for bot {}", trade.id, trade.bot_id);
        Ok(())
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET
                status = $2,
                order_id = $3,
                exchange_response = $4,
                fee = $5,
                filled_at = $6,
                closed_at = $7,
                realized_pnl = $8
            WHERE id = $1
            "#,
        )
        .bind(trade.id)
        .bind(trade.status.as_str())
        .bind(&trade.order_id)
        .bind(&trade.exchange_response)
        .bind(to_decimal(trade.fee)?)
        .bind(trade.filled_at)
        .bind(trade.closed_at)
        .bind(opt_decimal(trade.realized_pnl)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BotError::Storage(format!("trade {} not found", trade.id)));
        }
        Ok(())
    }

    async fn trades_for_bot(&self, bot_id: i64) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE bot_id = $1 ORDER BY created_at ASC",
            TRADE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(bot_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn trades_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at ASC",
            TRADE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }
}

#[async_trait]
impl DecisionLog for PostgresStore {
    async fn append(&self, entry: &DecisionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decision_logs (
                bot_type, bot_id, symbol, signal, price, rsi, ema, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&entry.bot_type)
        .bind(entry.bot_id)
        .bind(&entry.symbol)
        .bind(entry.signal.as_str())
        .bind(opt_decimal(entry.price)?)
        .bind(opt_decimal(entry.rsi)?)
        .bind(opt_decimal(entry.ema)?)
        .bind(&entry.reason)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

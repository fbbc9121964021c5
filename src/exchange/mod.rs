// Exchange clients
//
// One trait, one implementation per exchange dialect, and a factory keyed
// on `ExchangeId`. Every public call is rate limited and retried.
pub mod bybit;
pub mod okx;
pub mod response;
pub mod signing;
pub mod symbols;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::header::HeaderValue;
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::models::{BotType, Candle, ExchangeAccount, ExchangeId, TradeSide};
use crate::retry::RetryPolicy;

pub use bybit::BybitClient;
pub use okx::OkxClient;

pub(crate) type ExchangeRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// How much to trade, in the unit the caller chose
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSize {
    /// Quote currency to spend (spot market BUY)
    Quote(f64),
    /// Base currency quantity
    Base(f64),
    /// Whole contracts (OKX swaps)
    Contracts(u64),
}

impl OrderSize {
    pub fn amount(&self) -> f64 {
        match self {
            OrderSize::Quote(v) | OrderSize::Base(v) => *v,
            OrderSize::Contracts(n) => *n as f64,
        }
    }
}

/// Market order ready to be signed and sent
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub size: OrderSize,
    /// Idempotency key echoed by the exchange; retried POSTs reuse it
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: TradeSide, size: OrderSize) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            client_order_id: new_client_order_id(),
        }
    }
}

/// 32 hex characters, inside both exchanges' length limits
pub fn new_client_order_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| BotError::Config(format!("invalid header value: {}", e)))
}

/// Decimal string for an order amount, without float noise or trailing zeros
pub(crate) fn format_amount(value: f64) -> String {
    let s = format!("{:.8}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Immediate response to an accepted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderState {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Other(String),
}

/// Snapshot of an order as the exchange reports it
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInfo {
    pub order_id: String,
    pub state: OrderState,
    pub filled_qty: f64,
    pub avg_price: Option<f64>,
    pub fee: f64,
    pub raw: Value,
}

/// Transport settings shared by every client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeSettings {
    pub http_timeout: Duration,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
    pub retry: RetryPolicy,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            recv_window_ms: 5000,
            requests_per_second: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExchangeSettings {
    pub(crate) fn http_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(BotError::Http)
    }

    pub(crate) fn rate_limiter(&self) -> Arc<ExchangeRateLimiter> {
        let rps = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Arc::new(RateLimiter::direct(Quota::per_second(rps)))
    }
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Last traded price
    async fn get_price(&self, symbol: &str) -> Result<f64>;

    /// Most recent `limit` candles, oldest first
    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Available balance of one coin
    async fn get_balance(&self, coin: &str) -> Result<f64>;

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo>;
}

type ClientBuilder =
    dyn Fn(&ExchangeAccount, BotType, &ExchangeSettings) -> Result<Arc<dyn ExchangeClient>> + Send + Sync;

/// SHA-256 over everything a client is built from. Any change to the
/// account's credentials or environment yields a different value.
fn credential_fingerprint(account: &ExchangeAccount) -> String {
    let mut hasher = Sha256::new();
    for part in [
        account.exchange.as_str(),
        account.api_key.as_str(),
        account.api_secret.expose(),
        account.passphrase.as_ref().map_or("", |p| p.expose()),
        if account.testnet { "testnet" } else { "mainnet" },
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Clients kept across cycles so bots on the same account share a rate limiter
pub struct ClientPool {
    settings: ExchangeSettings,
    builder: Box<ClientBuilder>,
    clients: Mutex<HashMap<(i64, BotType), (String, Arc<dyn ExchangeClient>)>>,
}

impl ClientPool {
    pub fn new(settings: ExchangeSettings) -> Self {
        Self::with_builder(settings, create_client)
    }

    /// Pool that builds clients with `builder` instead of the factory
    pub fn with_builder<F>(settings: ExchangeSettings, builder: F) -> Self
    where
        F: Fn(&ExchangeAccount, BotType, &ExchangeSettings) -> Result<Arc<dyn ExchangeClient>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            settings,
            builder: Box::new(builder),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Cached client for the account, rebuilt when any credential or the
    /// testnet flag changes
    pub async fn client(
        &self,
        account: &ExchangeAccount,
        market: BotType,
    ) -> Result<Arc<dyn ExchangeClient>> {
        let fingerprint = credential_fingerprint(account);
        let mut clients = self.clients.lock().await;
        if let Some((cached, client)) = clients.get(&(account.id, market)) {
            if *cached == fingerprint {
                return Ok(client.clone());
            }
            tracing::info!(
                "Credentials changed for account {}, rebuilding {} client",
                account.id,
                market.as_str()
            );
        }

        let client = (self.builder)(account, market, &self.settings)?;
        clients.insert((account.id, market), (fingerprint, client.clone()));
        Ok(client)
    }
}

/// Build the client for an account's exchange
pub fn create_client(
    account: &ExchangeAccount,
    market: BotType,
    settings: &ExchangeSettings,
) -> Result<Arc<dyn ExchangeClient>> {
    let client: Arc<dyn ExchangeClient> = match account.exchange {
        ExchangeId::Bybit => Arc::new(BybitClient::new(account, market, settings)?),
        ExchangeId::Okx => Arc::new(OkxClient::new(account, market, settings)?),
    };
    tracing::debug!(
        "Created {} client for account {} ({}, testnet={})",
        account.exchange,
        account.id,
        market.as_str(),
        account.testnet
    );
    Ok(client)
}

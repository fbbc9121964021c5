use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::sync::Arc;

use super::response::{
    array_field, number_field, optional_number_field, parse_candles_newest_first,
    parse_object, str_field,
};
use super::signing::{encode_query, iso_timestamp, prehash_payload, sign_base64};
use super::symbols::{to_okx_interval, to_okx_swap_symbol, to_okx_symbol};
use super::{
    format_amount, header_value, ExchangeClient, ExchangeRateLimiter, ExchangeSettings, OrderAck,
    OrderInfo, OrderRequest, OrderSize, OrderState,
};
use crate::error::{BotError, Result};
use crate::models::{BotType, Candle, ExchangeAccount, ExchangeId, Secret, TradeSide};
use crate::retry::{retry, RetryPolicy};

const OKX_API_BASE: &str = "https://www.okx.com";
const MAX_CANDLE_LIMIT: usize = 300;

/// OKX v5 REST client (spot cash trading or USDT swaps in cross margin)
///
/// Signature: base64 HMAC-SHA256 over
/// `timestamp + METHOD + request_path(+?query) + body`. Demo trading uses the
/// production host with the `x-simulated-trading` header.
#[derive(Clone)]
pub struct OkxClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: Secret,
    passphrase: Secret,
    simulated: bool,
    market: BotType,
    retry: RetryPolicy,
    rate_limiter: Arc<ExchangeRateLimiter>,
}

impl OkxClient {
    pub fn new(account: &ExchangeAccount, market: BotType, settings: &ExchangeSettings) -> Result<Self> {
        let passphrase = account.passphrase.clone().ok_or_else(|| {
            BotError::Config(format!(
                "OKX account {} has no API passphrase",
                account.id
            ))
        })?;

        Ok(Self {
            client: settings.http_client()?,
            base_url: OKX_API_BASE.to_string(),
            api_key: account.api_key.clone(),
            api_secret: account.api_secret.clone(),
            passphrase,
            simulated: account.testnet,
            market,
            retry: settings.retry,
            rate_limiter: settings.rate_limiter(),
        })
    }

    /// Send requests to another host instead of the public API
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn instrument(&self, symbol: &str) -> String {
        match self.market {
            BotType::Spot => to_okx_symbol(symbol),
            BotType::Futures => to_okx_swap_symbol(symbol),
        }
    }

    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if self.simulated {
            headers.insert("x-simulated-trading", header_value("1")?);
        }
        Ok(headers)
    }

    fn signature_headers(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<HeaderMap> {
        let signature = sign_base64(
            self.api_secret.expose(),
            &prehash_payload(timestamp, method, request_path, body),
        )?;

        let mut headers = self.base_headers()?;
        headers.insert("ok-access-key", header_value(&self.api_key)?);
        headers.insert("ok-access-sign", header_value(&signature)?);
        headers.insert("ok-access-timestamp", header_value(timestamp)?);
        headers.insert("ok-access-passphrase", header_value(self.passphrase.expose())?);
        Ok(headers)
    }

    async fn get(&self, path: &str, params: &[(&str, String)], signed: bool) -> Result<Vec<Value>> {
        self.rate_limiter.until_ready().await;

        let query = encode_query(params)?;
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        };

        let headers = if signed {
            self.signature_headers(&iso_timestamp(Utc::now()), "GET", &request_path, "")?
        } else {
            self.base_headers()?
        };
        let request = self
            .client
            .get(format!("{}{}", self.base_url, request_path))
            .headers(headers);
        self.send(request, path).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Vec<Value>> {
        self.rate_limiter.until_ready().await;

        let body = serde_json::to_string(body)?;
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .headers(self.signature_headers(&iso_timestamp(Utc::now()), "POST", path, &body)?)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, path).await
    }

    /// Unwrap the `{code, msg, data}` envelope. `code` decides success even
    /// when the HTTP status says otherwise.
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Vec<Value>> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!("OKX {} -> HTTP {}", path, status);

        let body = parse_object(status, &text)?;
        let code = str_field(&body, "code")
            .map_err(|_| BotError::invalid_response(format!("{}: missing code", path)))?;
        if code != "0" {
            return Err(BotError::ApiError {
                code,
                message: body
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(array_field(&body, "data")?.clone())
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let data = self
            .get(
                "/api/v5/market/ticker",
                &[("instId", self.instrument(symbol))],
                false,
            )
            .await?;
        let ticker = data
            .first()
            .ok_or_else(|| BotError::invalid_response(format!("no ticker for {}", symbol)))?;
        number_field(ticker, "last")
    }

    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let data = self
            .get(
                "/api/v5/market/candles",
                &[
                    ("instId", self.instrument(symbol)),
                    ("bar", to_okx_interval(interval)),
                    ("limit", limit.clamp(1, MAX_CANDLE_LIMIT).to_string()),
                ],
                false,
            )
            .await?;
        parse_candles_newest_first(&data)
    }

    async fn fetch_balance(&self, coin: &str) -> Result<f64> {
        let coin = coin.to_ascii_uppercase();
        let data = self
            .get("/api/v5/account/balance", &[("ccy", coin.clone())], true)
            .await?;
        let account = data
            .first()
            .ok_or_else(|| BotError::invalid_response("empty balance response"))?;

        for detail in array_field(account, "details")? {
            if str_field(detail, "ccy")? == coin {
                return number_field(detail, "availBal");
            }
        }
        tracing::debug!("OKX account has no {} balance", coin);
        Ok(0.0)
    }

    fn order_body(&self, order: &OrderRequest) -> Result<Value> {
        let side = match order.side {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        };
        let inst_id = self.instrument(&order.symbol);

        let mut body = match (order.size, self.market) {
            (OrderSize::Quote(v) | OrderSize::Base(v), BotType::Spot) => {
                if v <= 0.0 {
                    return Err(BotError::InvalidParameter(format!(
                        "order size must be > 0, got {}",
                        v
                    )));
                }
                let target = match order.size {
                    OrderSize::Quote(_) => "quote_ccy",
                    _ => "base_ccy",
                };
                json!({
                    "instId": inst_id,
                    "tdMode": "cash",
                    "side": side,
                    "ordType": "market",
                    "sz": format_amount(v),
                    "tgtCcy": target,
                })
            }
            (OrderSize::Contracts(n), BotType::Futures) if n > 0 => json!({
                "instId": inst_id,
                "tdMode": "cross",
                "side": side,
                "ordType": "market",
                "sz": n.to_string(),
            }),
            (size, market) => {
                return Err(BotError::InvalidParameter(format!(
                    "{:?} is not a valid OKX {} order size",
                    size,
                    market.as_str()
                )))
            }
        };
        body["clOrdId"] = json!(order.client_order_id);
        Ok(body)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let body = self.order_body(order)?;
        let data = self.post("/api/v5/trade/order", &body).await?;
        let result = data
            .first()
            .ok_or_else(|| BotError::invalid_response("empty order response"))?;

        // Per-order status inside a successful envelope
        let s_code = str_field(result, "sCode").unwrap_or_else(|_| "0".to_string());
        if s_code != "0" {
            return Err(BotError::ApiError {
                code: s_code,
                message: str_field(result, "sMsg").unwrap_or_default(),
            });
        }

        Ok(OrderAck {
            order_id: str_field(result, "ordId")?,
            client_order_id: str_field(result, "clOrdId")
                .unwrap_or_else(|_| order.client_order_id.clone()),
            raw: result.clone(),
        })
    }

    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo> {
        let data = self
            .get(
                "/api/v5/trade/order",
                &[
                    ("instId", self.instrument(symbol)),
                    ("ordId", order_id.to_string()),
                ],
                true,
            )
            .await?;
        let entry = data
            .first()
            .ok_or_else(|| BotError::invalid_response(format!("order {} not found", order_id)))?;

        Ok(OrderInfo {
            order_id: str_field(entry, "ordId")?,
            state: parse_order_state(&str_field(entry, "state")?),
            filled_qty: optional_number_field(entry, "accFillSz")?.unwrap_or(0.0),
            avg_price: optional_number_field(entry, "avgPx")?.filter(|p| *p > 0.0),
            // Fees paid are reported as negative numbers
            fee: optional_number_field(entry, "fee")?.unwrap_or(0.0).abs(),
            raw: entry.clone(),
        })
    }
}

fn parse_order_state(state: &str) -> OrderState {
    match state {
        "live" => OrderState::Open,
        "partially_filled" => OrderState::PartiallyFilled,
        "filled" => OrderState::Filled,
        "canceled" | "mmp_canceled" => OrderState::Cancelled,
        other => OrderState::Other(other.to_string()),
    }
}

#[async_trait]
impl ExchangeClient for OkxClient {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    async fn get_price(&self, symbol: &str) -> Result<f64> {
        retry(self.retry, || self.fetch_price(symbol)).await
    }

    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        retry(self.retry, || self.fetch_candles(symbol, interval, limit)).await
    }

    async fn get_balance(&self, coin: &str) -> Result<f64> {
        retry(self.retry, || self.fetch_balance(coin)).await
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        tracing::info!(
            "OKX {} {} {:?} (clOrdId {})",
            order.side.as_str(),
            self.instrument(&order.symbol),
            order.size,
            order.client_order_id
        );
        retry(self.retry, || self.submit_order(order)).await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo> {
        retry(self.retry, || self.fetch_order(symbol, order_id)).await
    }
}

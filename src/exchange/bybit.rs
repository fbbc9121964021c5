use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::sync::Arc;

use super::response::{
    array_field, field, first_entry, number_field, optional_number_field, parse_candles_newest_first,
    parse_object, str_field,
};
use super::signing::{flat_payload, sign_hex, sorted_query};
use super::symbols::{to_bybit_interval, to_bybit_symbol};
use super::{
    format_amount, header_value, ExchangeClient, ExchangeRateLimiter, ExchangeSettings, OrderAck,
    OrderInfo, OrderRequest, OrderSize, OrderState,
};
use crate::error::{BotError, Result};
use crate::models::{BotType, Candle, ExchangeAccount, ExchangeId, Secret, TradeSide};
use crate::retry::{retry, RetryPolicy};

const BYBIT_API_BASE: &str = "https://api.bybit.com";
const BYBIT_TESTNET_API_BASE: &str = "https://api-testnet.bybit.com";
const MAX_KLINE_LIMIT: usize = 1000;

/// Bybit v5 REST client (spot or USDT-linear perpetuals)
///
/// Private requests are signed with HMAC-SHA256 over
/// `timestamp + api_key + recv_window + payload`, where the payload is the
/// sorted query string for GET and the raw JSON body for POST.
#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: Secret,
    market: BotType,
    recv_window_ms: u64,
    retry: RetryPolicy,
    rate_limiter: Arc<ExchangeRateLimiter>,
}

impl BybitClient {
    pub fn new(account: &ExchangeAccount, market: BotType, settings: &ExchangeSettings) -> Result<Self> {
        let base_url = if account.testnet {
            BYBIT_TESTNET_API_BASE
        } else {
            BYBIT_API_BASE
        };

        Ok(Self {
            client: settings.http_client()?,
            base_url: base_url.to_string(),
            api_key: account.api_key.clone(),
            api_secret: account.api_secret.clone(),
            market,
            recv_window_ms: settings.recv_window_ms,
            retry: settings.retry,
            rate_limiter: settings.rate_limiter(),
        })
    }

    /// Send requests to another host instead of the public API
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn category(&self) -> &'static str {
        match self.market {
            BotType::Spot => "spot",
            BotType::Futures => "linear",
        }
    }

    fn signature_headers(&self, timestamp: i64, payload: &str) -> Result<HeaderMap> {
        let signature = sign_hex(
            self.api_secret.expose(),
            &flat_payload(timestamp, &self.api_key, self.recv_window_ms, payload),
        )?;

        let mut headers = HeaderMap::new();
        headers.insert("x-bapi-api-key", header_value(&self.api_key)?);
        headers.insert("x-bapi-timestamp", header_value(&timestamp.to_string())?);
        headers.insert(
            "x-bapi-recv-window",
            header_value(&self.recv_window_ms.to_string())?,
        );
        headers.insert("x-bapi-sign", header_value(&signature)?);
        Ok(headers)
    }

    async fn get(&self, path: &str, params: &[(&str, String)], signed: bool) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let query = sorted_query(params)?;
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.get(&url);
        if signed {
            request = request.headers(self.signature_headers(Utc::now().timestamp_millis(), &query)?);
        }
        self.send(request, path).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let body = serde_json::to_string(body)?;
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .headers(self.signature_headers(Utc::now().timestamp_millis(), &body)?)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, path).await
    }

    /// Unwrap the `{retCode, retMsg, result}` envelope
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!("Bybit {} -> HTTP {}", path, status);

        let body = parse_object(status, &text)?;
        let ret_code = body
            .get("retCode")
            .and_then(Value::as_i64)
            .ok_or_else(|| BotError::invalid_response(format!("{}: missing retCode", path)))?;
        if ret_code != 0 {
            return Err(BotError::ApiError {
                code: ret_code.to_string(),
                message: body
                    .get("retMsg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(field(&body, "result")?.clone())
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let result = self
            .get(
                "/v5/market/tickers",
                &[
                    ("category", self.category().to_string()),
                    ("symbol", to_bybit_symbol(symbol)),
                ],
                false,
            )
            .await?;
        number_field(first_entry(&result, "list", "ticker")?, "lastPrice")
    }

    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let result = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", self.category().to_string()),
                    ("symbol", to_bybit_symbol(symbol)),
                    ("interval", to_bybit_interval(interval)),
                    ("limit", limit.clamp(1, MAX_KLINE_LIMIT).to_string()),
                ],
                false,
            )
            .await?;
        parse_candles_newest_first(array_field(&result, "list")?)
    }

    async fn fetch_balance(&self, coin: &str) -> Result<f64> {
        let coin = coin.to_ascii_uppercase();
        let result = self
            .get(
                "/v5/account/wallet-balance",
                &[
                    ("accountType", "UNIFIED".to_string()),
                    ("coin", coin.clone()),
                ],
                true,
            )
            .await?;

        let account = first_entry(&result, "list", "wallet")?;
        for entry in array_field(account, "coin")? {
            if str_field(entry, "coin")? == coin {
                let wallet = number_field(entry, "walletBalance")?;
                let locked = optional_number_field(entry, "locked")?.unwrap_or(0.0);
                return Ok(wallet - locked);
            }
        }
        // Coins never held are left out of the wallet
        tracing::debug!("Bybit wallet has no {} entry", coin);
        Ok(0.0)
    }

    fn order_body(&self, order: &OrderRequest) -> Result<Value> {
        let (qty, market_unit) = match (order.size, self.market) {
            (OrderSize::Quote(v), BotType::Spot) => (v, Some("quoteCoin")),
            (OrderSize::Base(v), BotType::Spot) => (v, Some("baseCoin")),
            (OrderSize::Base(v), BotType::Futures) => (v, None),
            (size, market) => {
                return Err(BotError::InvalidParameter(format!(
                    "{:?} is not a valid Bybit {} order size",
                    size,
                    market.as_str()
                )))
            }
        };
        if qty <= 0.0 {
            return Err(BotError::InvalidParameter(format!(
                "order quantity must be > 0, got {}",
                qty
            )));
        }

        let mut body = json!({
            "category": self.category(),
            "symbol": to_bybit_symbol(&order.symbol),
            "side": match order.side {
                TradeSide::Buy => "Buy",
                TradeSide::Sell => "Sell",
            },
            "orderType": "Market",
            "qty": format_amount(qty),
            "orderLinkId": order.client_order_id,
        });
        if let Some(unit) = market_unit {
            body["marketUnit"] = json!(unit);
        }
        Ok(body)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let body = self.order_body(order)?;
        let result = self.post("/v5/order/create", &body).await?;

        Ok(OrderAck {
            order_id: str_field(&result, "orderId")?,
            client_order_id: str_field(&result, "orderLinkId")
                .unwrap_or_else(|_| order.client_order_id.clone()),
            raw: result,
        })
    }

    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo> {
        let params = [
            ("category", self.category().to_string()),
            ("symbol", to_bybit_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ];

        // Open and recently closed orders live under realtime; older ones
        // only show up in history
        let mut result = self.get("/v5/order/realtime", &params, true).await?;
        if array_field(&result, "list")?.is_empty() {
            result = self.get("/v5/order/history", &params, true).await?;
        }
        let entry = first_entry(&result, "list", "order")?;

        Ok(OrderInfo {
            order_id: str_field(entry, "orderId")?,
            state: parse_order_status(&str_field(entry, "orderStatus")?),
            filled_qty: optional_number_field(entry, "cumExecQty")?.unwrap_or(0.0),
            avg_price: optional_number_field(entry, "avgPrice")?.filter(|p| *p > 0.0),
            fee: optional_number_field(entry, "cumExecFee")?.unwrap_or(0.0),
            raw: entry.clone(),
        })
    }
}

fn parse_order_status(status: &str) -> OrderState {
    match status {
        "New" | "Created" | "Untriggered" | "Triggered" => OrderState::Open,
        "PartiallyFilled" => OrderState::PartiallyFilled,
        "Filled" => OrderState::Filled,
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => OrderState::Cancelled,
        "Rejected" => OrderState::Rejected,
        other => OrderState::Other(other.to_string()),
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
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
            "Bybit {} {} {:?} (link id {})",
            order.side.as_str(),
            order.symbol,
            order.size,
            order.client_order_id
        );
        retry(self.retry, || self.submit_order(order)).await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderInfo> {
        retry(self.retry, || self.fetch_order(symbol, order_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    fn settings() -> ExchangeSettings {
        ExchangeSettings {
            requests_per_second: 1000,
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
            ..ExchangeSettings::default()
        }
    }

    fn client(market: BotType, base_url: &str) -> BybitClient {
        let account = ExchangeAccount {
            id: 7,
            exchange: ExchangeId::Bybit,
            api_key: "test-key".to_string(),
            api_secret: Secret::new("test-secret"),
            passphrase: None,
            testnet: true,
        };
        BybitClient::new(&account, market, &settings())
            .unwrap()
            .with_base_url(base_url)
    }

    #[test]
    fn test_testnet_base_url() {
        let c = client(BotType::Spot, BYBIT_TESTNET_API_BASE);
        assert_eq!(c.base_url, "https://api-testnet.bybit.com");
        assert_eq!(c.category(), "spot");
        assert_eq!(client(BotType::Futures, "x").category(), "linear");
    }

    fn sign_header(headers: &HeaderMap) -> &str {
        headers["x-bapi-sign"].to_str().unwrap()
    }

    #[test]
    fn test_signed_get_fixture() {
        let c = client(BotType::Spot, "http://localhost");
        let query = "accountType=UNIFIED&coin=USDT";
        assert_eq!(
            flat_payload(1_700_000_000_000, "test-key", 5000, query),
            "1700000000000test-key5000accountType=UNIFIED&coin=USDT"
        );

        let headers = c.signature_headers(1_700_000_000_000, query).unwrap();
        assert_eq!(
            sign_header(&headers),
            "5e3368dc6513523693e132a7282a050c40c53c95b5ab65bf70a921fdd91b45a6"
        );
        assert_eq!(headers["x-bapi-timestamp"], "1700000000000");
        assert_eq!(headers["x-bapi-recv-window"], "5000");
        assert_eq!(headers["x-bapi-api-key"], "test-key");
    }

    #[test]
    fn test_signed_post_fixture() {
        let c = client(BotType::Spot, "http://localhost");
        let body = r#"{"category":"spot","orderType":"Market","qty":"0.5","side":"Buy","symbol":"BTCUSDT"}"#;

        let headers = c.signature_headers(1_700_000_000_000, body).unwrap();
        assert_eq!(
            sign_header(&headers),
            "88557da83786614523f16ba0b90cce59e4b1458d650b357a8c9c997ff1aca882"
        );
    }

    #[tokio::test]
    async fn test_get_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/market/tickers")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("category".into(), "spot".into()),
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[{"symbol":"BTCUSDT","lastPrice":"43250.50"}]}}"#,
            )
            .create_async()
            .await;

        let price = client(BotType::Spot, &server.url())
            .get_price("BTCUSDT")
            .await
            .unwrap();
        assert_eq!(price, 43250.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_candles_oldest_first() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v5/market/kline")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("interval".into(), "60".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[
                    ["1700003600000","101","103","100","102","5.5","561"],
                    ["1700000000000","100","102","99","101","4.0","404"]
                ]}}"#,
            )
            .create_async()
            .await;

        let candles = client(BotType::Spot, &server.url())
            .get_candles("BTCUSDT", "60", 2)
            .await
            .unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].close, 102.0);
    }

    #[tokio::test]
    async fn test_api_error_is_retried_then_returned() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/market/tickers")
            .match_query(Matcher::Any)
            .with_body(r#"{"retCode":10001,"retMsg":"params error","result":{}}"#)
            .expect(2)
            .create_async()
            .await;

        let err = client(BotType::Spot, &server.url())
            .get_price("BTCUSDT")
            .await
            .unwrap_err();
        match err {
            BotError::ApiError { code, message } => {
                assert_eq!(code, "10001");
                assert_eq!(message, "params error");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v5/market/tickers")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let err = client(BotType::Spot, &server.url())
            .get_price("BTCUSDT")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unparsable_price_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v5/market/tickers")
            .match_query(Matcher::Any)
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"lastPrice":"n/a"}]}}"#)
            .create_async()
            .await;

        let err = client(BotType::Spot, &server.url())
            .get_price("BTCUSDT")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_signed_balance_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("accountType".into(), "UNIFIED".into()),
                Matcher::UrlEncoded("coin".into(), "USDT".into()),
            ]))
            .match_header("x-bapi-api-key", "test-key")
            .match_header("x-bapi-recv-window", "5000")
            .match_header("x-bapi-sign", Matcher::Regex("^[0-9a-f]{64}$".to_string()))
            .match_header("x-bapi-timestamp", Matcher::Regex(r"^\d{13}$".to_string()))
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"accountType":"UNIFIED","coin":[
                    {"coin":"USDT","walletBalance":"1500.25","locked":"100.25"}
                ]}]}}"#,
            )
            .create_async()
            .await;

        let balance = client(BotType::Spot, &server.url())
            .get_balance("usdt")
            .await
            .unwrap();
        assert_eq!(balance, 1400.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_place_spot_order_body() {
        let mut server = mockito::Server::new_async().await;
        let order = OrderRequest::market("BTCUSDT", TradeSide::Buy, OrderSize::Base(0.0033));
        let mock = server
            .mock("POST", "/v5/order/create")
            .match_header("content-type", "application/json")
            .match_header("x-bapi-sign", Matcher::Regex("^[0-9a-f]{64}$".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "category": "spot",
                "symbol": "BTCUSDT",
                "side": "Buy",
                "orderType": "Market",
                "qty": "0.0033",
                "marketUnit": "baseCoin",
                "orderLinkId": order.client_order_id,
            })))
            .with_body(format!(
                r#"{{"retCode":0,"retMsg":"OK","result":{{"orderId":"1321003749386327552","orderLinkId":"{}"}}}}"#,
                order.client_order_id
            ))
            .create_async()
            .await;

        let ack = client(BotType::Spot, &server.url())
            .place_market_order(&order)
            .await
            .unwrap();
        assert_eq!(ack.order_id, "1321003749386327552");
        assert_eq!(ack.client_order_id, order.client_order_id);
        mock.assert_async().await;
    }

    #[test]
    fn test_linear_order_has_no_market_unit() {
        let c = client(BotType::Futures, "http://localhost");
        let body = c
            .order_body(&OrderRequest::market("ETHUSDT", TradeSide::Sell, OrderSize::Base(1.5)))
            .unwrap();
        assert_eq!(body["category"], "linear");
        assert_eq!(body["side"], "Sell");
        assert_eq!(body["qty"], "1.5");
        assert!(body.get("marketUnit").is_none());

        let err = c
            .order_body(&OrderRequest::market("ETHUSDT", TradeSide::Buy, OrderSize::Contracts(2)))
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_get_order_falls_back_to_history() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v5/order/realtime")
            .match_query(Matcher::Any)
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"list":[]}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v5/order/history")
            .match_query(Matcher::UrlEncoded("orderId".into(), "abc".into()))
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"orderId":"abc","orderStatus":"Filled","cumExecQty":"0.5","avgPrice":"43000","cumExecFee":"0.0005"}]}}"#,
            )
            .create_async()
            .await;

        let info = client(BotType::Spot, &server.url())
            .get_order("BTCUSDT", "abc")
            .await
            .unwrap();
        assert_eq!(info.state, OrderState::Filled);
        assert_eq!(info.filled_qty, 0.5);
        assert_eq!(info.avg_price, Some(43000.0));
        assert_eq!(info.fee, 0.0005);
    }
}

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use crate::error::{BotError, Result};

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Config(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// HMAC-SHA256 of `payload`, lowercase hex
pub fn sign_hex(secret: &str, payload: &str) -> Result<String> {
    Ok(hex::encode(mac(secret, payload)?.finalize().into_bytes()))
}

/// HMAC-SHA256 of `payload`, standard base64
pub fn sign_base64(secret: &str, payload: &str) -> Result<String> {
    Ok(BASE64.encode(mac(secret, payload)?.finalize().into_bytes()))
}

/// URL-encode query pairs in the given order
pub fn encode_query(params: &[(&str, String)]) -> Result<String> {
    let mut url = Url::parse("http://localhost/")
        .map_err(|e| BotError::InvalidParameter(e.to_string()))?;
    if params.is_empty() {
        return Ok(String::new());
    }
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
    Ok(url.query().unwrap_or_default().to_string())
}

/// URL-encode query pairs sorted by key
pub fn sorted_query(params: &[(&str, String)]) -> Result<String> {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    encode_query(&sorted)
}

/// Millisecond timestamp + key + receive window + (query or body)
pub fn flat_payload(timestamp_ms: i64, api_key: &str, recv_window_ms: u64, params: &str) -> String {
    format!("{}{}{}{}", timestamp_ms, api_key, recv_window_ms, params)
}

/// Timestamp + upper-case method + path with query + body
pub fn prehash_payload(timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
    format!(
        "{}{}{}{}",
        timestamp,
        method.to_ascii_uppercase(),
        request_path,
        body
    )
}

/// ISO-8601 UTC with milliseconds, e.g. `2024-01-01T00:00:00.000Z`
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

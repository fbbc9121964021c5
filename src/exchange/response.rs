use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{BotError, Result};
use crate::models::Candle;

/// Parse a response body that must be a JSON object.
///
/// Non-JSON and non-object bodies are `InvalidResponse`, with the HTTP
/// status attached so a proxy error page is easy to tell apart.
pub fn parse_object(status: reqwest::StatusCode, body: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        BotError::invalid_response(format!(
            "HTTP {}: body is not JSON ({}): {}",
            status,
            e,
            truncate(body, 200)
        ))
    })?;
    if !value.is_object() {
        return Err(BotError::invalid_response(format!(
            "HTTP {}: expected a JSON object, got {}",
            status,
            truncate(body, 200)
        )));
    }
    Ok(value)
}

/// Required member of an object
pub fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| BotError::invalid_response(format!("missing field '{}'", key)))
}

pub fn str_field(value: &Value, key: &str) -> Result<String> {
    match field(value, key)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(BotError::invalid_response(format!(
            "field '{}' is not a string: {}",
            key, other
        ))),
    }
}

/// Numeric member; exchanges send numbers as strings
pub fn number_field(value: &Value, key: &str) -> Result<f64> {
    as_number(field(value, key)?, key)
}

/// Like `number_field`, but an absent or empty value is `None`
pub fn optional_number_field(value: &Value, key: &str) -> Result<Option<f64>> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(v) => as_number(v, key).map(Some),
    }
}

pub fn as_number(value: &Value, what: &str) -> Result<f64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(BotError::invalid_response(format!(
            "'{}' is not a number: {}",
            what, value
        ))),
    }
}

/// Member that must be an array
pub fn array_field<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    field(value, key)?
        .as_array()
        .ok_or_else(|| BotError::invalid_response(format!("field '{}' is not an array", key)))
}

/// First element of an array member; empty means the exchange knows nothing
pub fn first_entry<'a>(value: &'a Value, key: &str, what: &str) -> Result<&'a Value> {
    array_field(value, key)?
        .first()
        .ok_or_else(|| BotError::invalid_response(format!("no {} in response", what)))
}

/// OHLCV row `[start_ms, open, high, low, close, volume, ...]`
///
/// Both exchanges use this layout with string cells.
pub fn parse_candle_row(row: &Value) -> Result<Candle> {
    let cells = row
        .as_array()
        .ok_or_else(|| BotError::invalid_response(format!("candle row is not an array: {}", row)))?;
    if cells.len() < 6 {
        return Err(BotError::invalid_response(format!(
            "candle row has {} cells, expected at least 6",
            cells.len()
        )));
    }

    let start_ms = as_number(&cells[0], "candle start")? as i64;
    Ok(Candle {
        open_time: millis_to_utc(start_ms)?,
        open: as_number(&cells[1], "open")?,
        high: as_number(&cells[2], "high")?,
        low: as_number(&cells[3], "low")?,
        close: as_number(&cells[4], "close")?,
        volume: as_number(&cells[5], "volume")?,
    })
}

/// Parse rows that arrive newest first and return them oldest first
pub fn parse_candles_newest_first(rows: &[Value]) -> Result<Vec<Candle>> {
    let mut candles = rows
        .iter()
        .map(parse_candle_row)
        .collect::<Result<Vec<_>>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BotError::invalid_response(format!("invalid timestamp: {}", ms)))
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

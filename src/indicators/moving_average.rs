use crate::error::{BotError, Result};

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn check_period(len: usize, period: usize) -> Result<()> {
    if period == 0 {
        return Err(BotError::InvalidParameter("period must be > 0".to_string()));
    }
    if len < period {
        return Err(BotError::InsufficientData {
            needed: period,
            got: len,
        });
    }
    Ok(())
}

/// Calculate Simple Moving Average (SMA) over the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Result<f64> {
    check_period(prices.len(), period)?;

    let sum: f64 = prices.iter().rev().take(period).sum();
    Ok(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA)
///
/// Seeded with the SMA of the first `period` values, then
/// `ema = price * k + ema * (1 - k)` with `k = 2 / (period + 1)`.
///
/// The final value is rounded to 2 decimals. Strategy thresholds are tuned
/// against that rounding, so keep it.
pub fn calculate_ema(prices: &[f64], period: usize) -> Result<f64> {
    let series = calculate_ema_series(prices, period)?;
    let last = series
        .last()
        .copied()
        .flatten()
        .ok_or(BotError::InsufficientData {
            needed: period,
            got: prices.len(),
        })?;
    Ok(round_to(last, 2))
}

/// Full unrounded EMA series aligned to the input index.
///
/// Indices before `period - 1` have no value yet.
pub fn calculate_ema_series(prices: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    check_period(prices.len(), period)?;

    let k = 2.0 / (period as f64 + 1.0);
    let mut series = vec![None; prices.len()];

    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    series[period - 1] = Some(ema);

    for (i, price) in prices.iter().enumerate().skip(period) {
        ema = price * k + ema * (1.0 - k);
        series[i] = Some(ema);
    }

    Ok(series)
}

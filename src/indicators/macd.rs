use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::indicators::moving_average::{calculate_ema_series, round_to};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

impl MacdParams {
    /// Fewest closes `calculate_macd` accepts
    pub fn min_closes(&self) -> usize {
        self.slow + self.signal - 1
    }
}

/// Last MACD, signal and histogram values, each rounded to 8 decimals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line `fast_ema[i] - slow_ema[i]` for every index from `slow - 1`
/// to the end of `closes`. Unrounded.
pub fn calculate_macd_line(closes: &[f64], fast: usize, slow: usize) -> Result<Vec<f64>> {
    if fast == 0 || slow == 0 || fast >= slow {
        return Err(BotError::InvalidParameter(format!(
            "MACD needs 0 < fast < slow, got fast={} slow={}",
            fast, slow
        )));
    }

    let fast_series = calculate_ema_series(closes, fast)?;
    let slow_series = calculate_ema_series(closes, slow)?;

    fast_series
        .iter()
        .zip(slow_series.iter())
        .skip(slow - 1)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Ok(f - s),
            _ => Err(BotError::InsufficientData {
                needed: slow,
                got: closes.len(),
            }),
        })
        .collect()
}

/// Moving Average Convergence Divergence
///
/// Requires `closes.len() >= slow + signal - 1`. The signal line is the EMA
/// series of the MACD line over `signal` periods; the histogram is the last
/// MACD value minus the last signal value.
pub fn calculate_macd(closes: &[f64], params: MacdParams) -> Result<MacdResult> {
    if params.signal == 0 {
        return Err(BotError::InvalidParameter(
            "MACD signal period must be > 0".to_string(),
        ));
    }
    if closes.len() < params.min_closes() {
        return Err(BotError::InsufficientData {
            needed: params.min_closes(),
            got: closes.len(),
        });
    }

    let macd_line = calculate_macd_line(closes, params.fast, params.slow)?;
    let signal_series = calculate_ema_series(&macd_line, params.signal)?;

    let last_macd = *macd_line.last().ok_or(BotError::InsufficientData {
        needed: params.min_closes(),
        got: closes.len(),
    })?;
    let last_signal = signal_series
        .last()
        .copied()
        .flatten()
        .ok_or(BotError::InsufficientData {
            needed: params.min_closes(),
            got: closes.len(),
        })?;

    Ok(MacdResult {
        macd: round_to(last_macd, 8),
        signal: round_to(last_signal, 8),
        histogram: round_to(last_macd - last_signal, 8),
    })
}

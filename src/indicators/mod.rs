// Technical indicators module
// Pure functions over a chronological close series: RSI, EMA/SMA, MACD

pub mod macd;
pub mod moving_average;
pub mod rsi;

use serde::{Deserialize, Serialize};

pub use macd::{calculate_macd, calculate_macd_line, MacdParams, MacdResult};
pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma, round_to};
pub use rsi::calculate_rsi;

/// Indicator values behind one decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IndicatorResult {
    pub rsi: f64,
    pub ema: f64,
    pub macd: Option<MacdResult>,
}

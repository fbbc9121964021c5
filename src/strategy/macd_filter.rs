use crate::error::Result;
use crate::indicators::{calculate_macd, MacdParams};
use crate::models::Signal;
use crate::strategy::{Evaluation, RsiEmaStrategy, Strategy};

/// RSI/EMA strategy with a MACD confirmation.
///
/// BUY additionally needs histogram >= 0 and SELL needs histogram <= 0.
/// A base signal that fails the confirmation becomes HOLD.
#[derive(Debug, Clone)]
pub struct MacdFilteredStrategy {
    base: RsiEmaStrategy,
    macd: MacdParams,
}

impl MacdFilteredStrategy {
    pub fn new(base: RsiEmaStrategy, macd: MacdParams) -> Self {
        Self { base, macd }
    }
}

impl Strategy for MacdFilteredStrategy {
    fn evaluate(&self, closes: &[f64]) -> Result<Evaluation> {
        let mut evaluation = self.base.evaluate(closes)?;
        let macd = calculate_macd(closes, self.macd)?;
        evaluation.indicators.macd = Some(macd);

        let confirmed = match evaluation.signal {
            Signal::Buy => macd.histogram >= 0.0,
            Signal::Sell => macd.histogram <= 0.0,
            _ => true,
        };

        if !confirmed {
            evaluation.reason = format!(
                "{} rejected by MACD histogram {:.8}",
                evaluation.signal, macd.histogram
            );
            evaluation.signal = Signal::Hold;
        }

        Ok(evaluation)
    }

    fn name(&self) -> &str {
        "rsi_ema_macd"
    }

    fn min_closes(&self) -> usize {
        self.base.min_closes().max(self.macd.min_closes())
    }
}

use crate::error::{BotError, Result};
use crate::indicators::{calculate_ema, calculate_rsi, IndicatorResult};
use crate::models::Signal;
use crate::strategy::{Evaluation, Strategy, StrategyParams};

/// Default distance from the EMA that still counts as "near trend" (1%)
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// RSI entry/exit filtered by proximity to the EMA.
///
/// - BUY: RSI below the buy threshold and price at or above `ema * (1 - tol)`
/// - SELL: RSI above the sell threshold and price at or below `ema * (1 + tol)`
/// - otherwise HOLD
///
/// The EMA acts as a trend filter, not a crossover: an extreme RSI far
/// from trend produces no signal.
pub fn classify(rsi: f64, ema: f64, price: f64, params: &StrategyParams) -> Signal {
    if rsi < params.rsi_buy_threshold && price >= ema * (1.0 - params.tolerance) {
        Signal::Buy
    } else if rsi > params.rsi_sell_threshold && price <= ema * (1.0 + params.tolerance) {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Compute RSI and EMA over `closes` and classify the last close
pub fn decide(
    closes: &[f64],
    rsi_period: usize,
    ema_period: usize,
    rsi_buy_threshold: f64,
    rsi_sell_threshold: f64,
) -> Result<Signal> {
    let strategy = RsiEmaStrategy::new(StrategyParams {
        rsi_period,
        ema_period,
        rsi_buy_threshold,
        rsi_sell_threshold,
        tolerance: DEFAULT_TOLERANCE,
    });
    Ok(strategy.evaluate(closes)?.signal)
}

#[derive(Debug, Clone)]
pub struct RsiEmaStrategy {
    params: StrategyParams,
}

impl RsiEmaStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }
}

impl Default for RsiEmaStrategy {
    fn default() -> Self {
        Self::new(StrategyParams::default())
    }
}

impl Strategy for RsiEmaStrategy {
    fn evaluate(&self, closes: &[f64]) -> Result<Evaluation> {
        let price = *closes.last().ok_or(BotError::InsufficientData {
            needed: self.min_closes(),
            got: 0,
        })?;

        let rsi = calculate_rsi(closes, self.params.rsi_period)?;
        let ema = calculate_ema(closes, self.params.ema_period)?;
        let signal = classify(rsi, ema, price, &self.params);

        let reason = match signal {
            Signal::Buy => format!(
                "RSI {:.2} < {:.2} with price {:.4} near EMA {:.2}",
                rsi, self.params.rsi_buy_threshold, price, ema
            ),
            Signal::Sell => format!(
                "RSI {:.2} > {:.2} with price {:.4} near EMA {:.2}",
                rsi, self.params.rsi_sell_threshold, price, ema
            ),
            _ => format!("RSI {:.2}, price {:.4}, EMA {:.2}: no entry", rsi, price, ema),
        };

        tracing::debug!("rsi_ema: rsi={:.2} ema={:.2} price={} -> {}", rsi, ema, price, signal);

        Ok(Evaluation {
            signal,
            indicators: IndicatorResult {
                rsi,
                ema,
                macd: None,
            },
            price,
            reason,
        })
    }

    fn name(&self) -> &str {
        "rsi_ema"
    }

    fn min_closes(&self) -> usize {
        (self.params.rsi_period + 1).max(self.params.ema_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 13 drops of 1.0 followed by rises of 1, 2, 2, 2:
    /// RSI(17) = 100 * 7 / 20 = 35, EMA(10) ends at 91.50, last close 94
    fn oversold_near_trend() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..=13).map(|i| 100.0 - i as f64).collect();
        closes.extend([88.0, 90.0, 92.0, 94.0]);
        closes
    }

    /// Mirror image: RSI(17) = 65, EMA(10) ends at 108.50, last close 106
    fn overbought_near_trend() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..=13).map(|i| 100.0 + i as f64).collect();
        closes.extend([112.0, 110.0, 108.0, 106.0]);
        closes
    }

    #[test]
    fn test_classify_fixtures() {
        let params = StrategyParams::default();

        assert_eq!(classify(35.0, 100.0, 100.0, &params), Signal::Buy);
        assert_eq!(classify(65.0, 100.0, 100.0, &params), Signal::Sell);
        assert_eq!(classify(50.0, 100.0, 100.0, &params), Signal::Hold);
        assert_eq!(classify(50.0, 100.0, 80.0, &params), Signal::Hold);
        assert_eq!(classify(50.0, 100.0, 120.0, &params), Signal::Hold);
    }

    #[test]
    fn test_classify_tolerance_band() {
        let params = StrategyParams::default();

        // Exactly 1% under the EMA still buys, further under does not
        assert_eq!(classify(35.0, 100.0, 99.0, &params), Signal::Buy);
        assert_eq!(classify(35.0, 100.0, 98.9, &params), Signal::Hold);

        // Exactly 1% over the EMA still sells, further over does not
        assert_eq!(classify(65.0, 100.0, 101.0, &params), Signal::Sell);
        assert_eq!(classify(65.0, 100.0, 101.1, &params), Signal::Hold);
    }

    #[test]
    fn test_decide_buy() {
        let closes = oversold_near_trend();
        let rsi = calculate_rsi(&closes, 17).unwrap();
        assert!((rsi - 35.0).abs() < 1e-9);
        assert_eq!(calculate_ema(&closes, 10).unwrap(), 91.5);

        assert_eq!(decide(&closes, 17, 10, 40.0, 60.0).unwrap(), Signal::Buy);
    }

    #[test]
    fn test_decide_sell() {
        let closes = overbought_near_trend();
        let rsi = calculate_rsi(&closes, 17).unwrap();
        assert!((rsi - 65.0).abs() < 1e-9);
        assert_eq!(calculate_ema(&closes, 10).unwrap(), 108.5);

        assert_eq!(decide(&closes, 17, 10, 40.0, 60.0).unwrap(), Signal::Sell);
    }

    #[test]
    fn test_decide_hold_on_neutral_rsi() {
        // Eight ups, eight downs, one flat delta: RSI 50
        let mut closes = vec![100.0];
        for i in 0..16 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        closes.push(*closes.last().unwrap());

        let rsi = calculate_rsi(&closes, 17).unwrap();
        assert!((rsi - 50.0).abs() < 1e-9);
        assert_eq!(decide(&closes, 17, 10, 40.0, 60.0).unwrap(), Signal::Hold);
    }

    #[test]
    fn test_decide_hold_when_far_below_trend() {
        // Straight decline: RSI 0 but price is well under the EMA
        let closes: Vec<f64> = (0..18).map(|i| 100.0 - i as f64).collect();
        assert_eq!(decide(&closes, 17, 10, 40.0, 60.0).unwrap(), Signal::Hold);
    }

    #[test]
    fn test_decide_insufficient_data() {
        let closes = vec![100.0; 17];
        let err = decide(&closes, 17, 10, 40.0, 60.0).unwrap_err();
        assert!(matches!(err, BotError::InsufficientData { .. }));
    }

    #[test]
    fn test_evaluation_carries_indicators() {
        let evaluation = RsiEmaStrategy::default()
            .evaluate(&oversold_near_trend())
            .unwrap();

        assert_eq!(evaluation.signal, Signal::Buy);
        assert_eq!(evaluation.price, 94.0);
        assert_eq!(evaluation.indicators.ema, 91.5);
        assert!(evaluation.indicators.macd.is_none());
        assert!(evaluation.reason.contains("RSI 35.00"));
    }
}

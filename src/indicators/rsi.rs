use crate::error::{BotError, Result};

/// Calculate Relative Strength Index (RSI) with Wilder smoothing
///
/// The first `period` price changes seed the average gain and loss with a
/// simple mean; every later change is folded in with
/// `avg = (avg * (period - 1) + value) / period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Returns 100.0 when the average loss is exactly zero. The result is not
/// rounded.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Result<f64> {
    if period == 0 {
        return Err(BotError::InvalidParameter("RSI period must be > 0".to_string()));
    }
    if closes.len() <= period {
        return Err(BotError::InsufficientData {
            needed: period + 1,
            got: closes.len(),
        });
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = deltas.split_at(period);

    let mut avg_gain = seed.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;

    let smoothing = (period - 1) as f64;
    for delta in rest {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * smoothing + gain) / period as f64;
        avg_loss = (avg_loss * smoothing + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Ok(100.0);
    }

    let rs = avg_gain / avg_loss;
    Ok(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // Seed over 2 deltas: +2, -1 -> avg gain 1.0, avg loss 0.5
        // Third delta +1: gain (1.0 + 1) / 2 = 1.0, loss (0.5 + 0) / 2 = 0.25
        let prices = vec![10.0, 12.0, 11.0, 12.0];
        let rsi = calculate_rsi(&prices, 2).unwrap();

        let expected = 100.0 - 100.0 / (1.0 + 1.0 / 0.25);
        assert!((rsi - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        let err = calculate_rsi(&prices, 14).unwrap_err();
        assert!(matches!(err, BotError::InsufficientData { needed: 15, got: 3 }));

        // len == period is still not enough
        let prices: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert!(calculate_rsi(&prices, 14).is_err());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = calculate_rsi(&prices, 5).unwrap();
        assert_eq!(rsi, 100.0); // All gains = RSI 100
    }

    #[test]
    fn test_rsi_rising_series_approaches_100() {
        // A single early dip, then a long climb: losses decay toward zero
        let mut prices = vec![100.0, 99.0];
        prices.extend((1..200).map(|i| 99.0 + i as f64));

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 99.0, "RSI should approach 100, got {}", rsi);
        assert!(rsi < 100.0);
    }

    #[test]
    fn test_rsi_falling_series_goes_to_zero() {
        let prices: Vec<f64> = (0..100).map(|i| 500.0 - i as f64).collect();
        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert_eq!(rsi, 0.0);

        // With an early bounce the gains decay toward zero
        let mut prices = vec![500.0, 501.0];
        prices.extend((1..200).map(|i| 501.0 - i as f64));
        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi < 1.0, "RSI should approach 0, got {}", rsi);
    }
}

// Canonical <-> exchange-native symbol and interval mapping
//
// Canonical symbols are concatenated pairs (`BTCUSDT`); canonical intervals
// are minutes (`1`, `15`, `60`) or `D` / `W` / `M`.

/// Quote currencies recognised when splitting a concatenated symbol,
/// longest first so `FDUSD` wins over `USD`
const QUOTE_ASSETS: &[&str] = &[
    "FDUSD", "USDT", "USDC", "TUSD", "BUSD", "EUR", "USD", "BTC", "ETH", "BNB",
];

/// Split `BTCUSDT` into `("BTC", "USDT")`. Already-dashed symbols split on
/// the dash.
pub fn split_symbol(symbol: &str) -> Option<(String, String)> {
    let upper = symbol.to_ascii_uppercase();
    if let Some((base, quote)) = upper.split_once('-') {
        return Some((base.to_string(), quote.to_string()));
    }
    QUOTE_ASSETS.iter().find_map(|quote| {
        upper
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), quote.to_string()))
    })
}

/// `BTCUSDT` -> `BTC-USDT`; unknown quotes pass through unchanged
pub fn to_okx_symbol(symbol: &str) -> String {
    match split_symbol(symbol) {
        Some((base, quote)) => format!("{}-{}", base, quote),
        None => symbol.to_string(),
    }
}

/// Perpetual swap instrument for a canonical symbol: `BTC-USDT-SWAP`
pub fn to_okx_swap_symbol(symbol: &str) -> String {
    format!("{}-SWAP", to_okx_symbol(symbol))
}

/// Bybit uses the canonical form
pub fn to_bybit_symbol(symbol: &str) -> String {
    symbol.replace('-', "").to_ascii_uppercase()
}

/// Canonical interval -> OKX `bar`; unmapped values pass through.
///
/// Bars of 6H and longer use the UTC-aligned variants so daily candles close
/// at UTC midnight like Bybit's.
pub fn to_okx_interval(interval: &str) -> String {
    match interval {
        "1" | "1m" => "1m",
        "3" | "3m" => "3m",
        "5" | "5m" => "5m",
        "15" | "15m" => "15m",
        "30" | "30m" => "30m",
        "60" | "1h" | "1H" => "1H",
        "120" | "2h" | "2H" => "2H",
        "240" | "4h" | "4H" => "4H",
        "360" | "6h" | "6H" => "6Hutc",
        "720" | "12h" | "12H" => "12Hutc",
        "D" | "1d" | "1D" | "1440" => "1Dutc",
        "W" | "1w" | "1W" => "1Wutc",
        "M" | "1M" => "1Mutc",
        other => other,
    }
    .to_string()
}

/// Canonical interval -> Bybit `interval`; unmapped values pass through
pub fn to_bybit_interval(interval: &str) -> String {
    match interval {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" | "1H" => "60",
        "2h" | "2H" => "120",
        "4h" | "4H" => "240",
        "6h" | "6H" => "360",
        "12h" | "12H" => "720",
        "1d" | "1D" | "1440" => "D",
        "1w" | "1W" => "W",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_symbol() {
        assert_eq!(
            split_symbol("BTCUSDT"),
            Some(("BTC".to_string(), "USDT".to_string()))
        );
        assert_eq!(
            split_symbol("ethbtc"),
            Some(("ETH".to_string(), "BTC".to_string()))
        );
        assert_eq!(
            split_symbol("SOL-USDC"),
            Some(("SOL".to_string(), "USDC".to_string()))
        );
        assert_eq!(split_symbol("USDT"), None);
        assert_eq!(split_symbol("XYZABC"), None);
    }

    #[test]
    fn test_okx_symbol_mapping() {
        assert_eq!(to_okx_symbol("BTCUSDT"), "BTC-USDT");
        assert_eq!(to_okx_symbol("BTC-USDT"), "BTC-USDT");
        assert_eq!(to_okx_swap_symbol("ETHUSDT"), "ETH-USDT-SWAP");
        assert_eq!(to_okx_symbol("XYZABC"), "XYZABC");
    }

    #[test]
    fn test_bybit_symbol_mapping() {
        assert_eq!(to_bybit_symbol("BTC-USDT"), "BTCUSDT");
        assert_eq!(to_bybit_symbol("btcusdt"), "BTCUSDT");
    }

    #[test]
    fn test_interval_mapping() {
        assert_eq!(to_okx_interval("60"), "1H");
        assert_eq!(to_okx_interval("240"), "4H");
        assert_eq!(to_okx_interval("15"), "15m");
        assert_eq!(to_okx_interval("4h"), "4H");
        // Daily and longer bars close on UTC boundaries
        assert_eq!(to_okx_interval("D"), "1Dutc");
        assert_eq!(to_okx_interval("1d"), "1Dutc");
        assert_eq!(to_okx_interval("1440"), "1Dutc");
        assert_eq!(to_okx_interval("720"), "12Hutc");
        assert_eq!(to_okx_interval("W"), "1Wutc");
        // Unmapped passes through
        assert_eq!(to_okx_interval("7"), "7");

        assert_eq!(to_bybit_interval("60"), "60");
        assert_eq!(to_bybit_interval("1h"), "60");
        assert_eq!(to_bybit_interval("1d"), "D");
    }
}

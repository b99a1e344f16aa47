//! Symbol conversion between the canonical form and venue formats
//!
//! Canonical symbols are `BASE/QUOTE` (`BTC/USDT`). Binance uses
//! `BTCUSDT` on REST and `btcusdt` in stream names, Coinbase uses `BTC-USD`.

use super::{ProviderError, ProviderResult};

/// Quote assets recognised when a symbol arrives without a separator.
/// Longer codes first so `USDT` wins over `USD`.
static QUOTE_ASSETS: &[&str] = &[
    "FDUSD", "USDT", "BUSD", "USDC", "TUSD", "USDP", "BTC", "ETH", "BNB", "EUR", "GBP", "TRY",
    "DAI", "USD",
];

/// A validated base/quote pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    /// Parse `BTC/USDT`, `BTC-USDT`, `btcusdt` and similar.
    pub fn parse(symbol: &str) -> ProviderResult<Self> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ProviderError::InvalidArgument(
                "symbol cannot be empty".to_string(),
            ));
        }

        let (base, quote) = match symbol.split_once(|c: char| c == '/' || c == '-' || c == '_') {
            Some((base, quote)) => (base.to_string(), quote.to_string()),
            None => split_joined(&symbol)?,
        };

        if base.is_empty() || quote.is_empty() {
            return Err(ProviderError::InvalidArgument(format!(
                "symbol '{}' must be BASE/QUOTE",
                symbol
            )));
        }
        if let Some(c) = base
            .chars()
            .chain(quote.chars())
            .find(|c| !c.is_ascii_alphanumeric())
        {
            return Err(ProviderError::InvalidArgument(format!(
                "invalid character '{}' in symbol: {}",
                c, symbol
            )));
        }

        Ok(Self { base, quote })
    }

    pub fn from_parts(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }

    /// `BTC/USDT`
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// `BTCUSDT`
    pub fn binance(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// `btcusdt`, as used in Binance stream names
    pub fn binance_stream(&self) -> String {
        self.binance().to_lowercase()
    }

    /// `BTC-USD`
    pub fn coinbase(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

fn split_joined(symbol: &str) -> ProviderResult<(String, String)> {
    QUOTE_ASSETS
        .iter()
        .find(|quote| symbol.ends_with(*quote) && symbol.len() > quote.len())
        .map(|quote| {
            let base = &symbol[..symbol.len() - quote.len()];
            (base.to_string(), quote.to_string())
        })
        .ok_or_else(|| {
            ProviderError::InvalidArgument(format!(
                "unable to determine quote currency for symbol: {}",
                symbol
            ))
        })
}

/// Canonicalise any accepted spelling (`btcusdt` -> `BTC/USDT`).
pub fn canonical(symbol: &str) -> ProviderResult<String> {
    Pair::parse(symbol).map(|p| p.canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_separators() {
        for raw in ["BTC/USDT", "btc/usdt", "BTC-USDT", "BTC_USDT", "BTCUSDT", " btcusdt "] {
            let pair = Pair::parse(raw).unwrap();
            assert_eq!(pair.canonical(), "BTC/USDT", "input {raw}");
        }
    }

    #[test]
    fn test_venue_formats() {
        let pair = Pair::parse("ETH/USD").unwrap();
        assert_eq!(pair.binance(), "ETHUSD");
        assert_eq!(pair.binance_stream(), "ethusd");
        assert_eq!(pair.coinbase(), "ETH-USD");
    }

    #[test]
    fn test_longest_quote_wins() {
        assert_eq!(canonical("SOLUSDT").unwrap(), "SOL/USDT");
        assert_eq!(canonical("ETHBTC").unwrap(), "ETH/BTC");
        assert_eq!(canonical("BTCUSD").unwrap(), "BTC/USD");
    }

    #[test]
    fn test_invalid_symbols() {
        assert!(matches!(Pair::parse(""), Err(ProviderError::InvalidArgument(_))));
        assert!(Pair::parse("BTC/").is_err());
        assert!(Pair::parse("BT$/USDT").is_err());
        assert!(Pair::parse("XYZ").is_err());
    }
}

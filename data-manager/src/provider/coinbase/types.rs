//! Coinbase Exchange REST response types
//!
//! Candle rows are JSON numbers, not strings, so they are kept as
//! `serde_json::Value` and converted with `decimal_value` to avoid float
//! round-off.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use trading_common::data::{BookLevel, Candle, Timeframe};

use crate::provider::{decimal, decimal_value, ProviderError, ProviderResult};

/// One `/products/{id}/candles` row: `[time, low, high, open, close, volume]`,
/// `time` in epoch seconds
#[derive(Debug, Clone, Deserialize)]
pub struct CandleRow(pub i64, pub Value, pub Value, pub Value, pub Value, pub Value);

impl CandleRow {
    pub fn into_candle(self, symbol: &str, timeframe: Timeframe) -> ProviderResult<Candle> {
        let timestamp = DateTime::<Utc>::from_timestamp(self.0, 0)
            .ok_or_else(|| ProviderError::Parse(format!("candle time out of range: {}", self.0)))?;
        Ok(Candle::new(
            "coinbase",
            symbol,
            timeframe,
            timestamp,
            decimal_value("open", &self.3)?,
            decimal_value("high", &self.2)?,
            decimal_value("low", &self.1)?,
            decimal_value("close", &self.4)?,
            decimal_value("volume", &self.5)?,
        ))
    }
}

/// `/products/{id}/ticker`
#[derive(Debug, Clone, Deserialize)]
pub struct ProductTicker {
    pub price: String,
    pub bid: String,
    pub ask: String,
    pub volume: String,
    pub time: DateTime<Utc>,
}

impl ProductTicker {
    pub fn into_ticker(self, symbol: &str) -> ProviderResult<trading_common::data::Ticker> {
        Ok(trading_common::data::Ticker {
            exchange: "coinbase".to_string(),
            symbol: symbol.to_string(),
            last: decimal("price", &self.price)?,
            bid: Some(decimal("bid", &self.bid)?),
            ask: Some(decimal("ask", &self.ask)?),
            high: None,
            low: None,
            volume: decimal("volume", &self.volume)?,
            quote_volume: None,
            change_percent: None,
            timestamp: self.time,
        })
    }
}

/// `/products/{id}/book?level=2`; levels are `[price, size, num_orders]`
#[derive(Debug, Clone, Deserialize)]
pub struct ProductBook {
    pub bids: Vec<(String, String, Value)>,
    pub asks: Vec<(String, String, Value)>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

pub fn parse_book_levels(levels: &[(String, String, Value)]) -> ProviderResult<Vec<BookLevel>> {
    levels
        .iter()
        .map(|(price, size, _)| {
            Ok(BookLevel {
                price: decimal("price", price)?,
                quantity: decimal("size", size)?,
            })
        })
        .collect()
}

/// `/products` entry
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub id: String,
    pub base_currency: String,
    pub quote_currency: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub trading_disabled: bool,
}

impl Product {
    pub fn is_online(&self) -> bool {
        self.status == "online" && !self.trading_disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_candle_row_column_order() {
        let rows: Vec<CandleRow> =
            serde_json::from_str("[[1704067200, 41800.5, 42200.0, 42000.1, 42100.25, 3.75]]")
                .unwrap();
        let candle = rows[0].clone().into_candle("BTC/USD", Timeframe::OneHour).unwrap();

        assert_eq!(candle.exchange, "coinbase");
        assert_eq!(candle.timestamp_millis(), 1_704_067_200_000);
        assert_eq!(candle.low, dec!(41800.5));
        assert_eq!(candle.high, dec!(42200.0));
        assert_eq!(candle.open, dec!(42000.1));
        assert_eq!(candle.close, dec!(42100.25));
        assert_eq!(candle.volume, dec!(3.75));
        assert!(candle.is_valid());
    }

    #[test]
    fn test_ticker() {
        let json = r#"{"trade_id": 1, "price": "42000.01", "size": "0.1", "bid": "42000",
                       "ask": "42000.02", "volume": "1234.5", "time": "2024-01-01T00:00:00.123Z"}"#;
        let ticker = serde_json::from_str::<ProductTicker>(json)
            .unwrap()
            .into_ticker("BTC/USD")
            .unwrap();
        assert_eq!(ticker.last, dec!(42000.01));
        assert_eq!(ticker.ask, Some(dec!(42000.02)));
    }

    #[test]
    fn test_book_levels() {
        let json = r#"{"sequence": 3, "bids": [["295.96", "4.39088265", 2]], "asks": [["295.97", "25.23542881", 12]]}"#;
        let book: ProductBook = serde_json::from_str(json).unwrap();
        let asks = parse_book_levels(&book.asks).unwrap();
        assert_eq!(asks[0].price, dec!(295.97));
        assert_eq!(book.sequence, Some(3));
    }
}

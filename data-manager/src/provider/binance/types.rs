//! Binance REST response types

use chrono::Utc;
use serde::Deserialize;

use trading_common::data::{millis_to_utc, BookLevel, Candle, Timeframe};

use crate::provider::{decimal, ProviderError, ProviderResult};

/// One `/api/v3/klines` row:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
///   trades, taker_buy_base, taker_buy_quote, ignore]`
#[derive(Debug, Clone, Deserialize)]
pub struct KlineRow(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub u64,
    pub String,
    pub String,
    pub serde_json::Value,
);

impl KlineRow {
    pub fn open_time(&self) -> i64 {
        self.0
    }

    pub fn into_candle(self, symbol: &str, timeframe: Timeframe) -> ProviderResult<Candle> {
        let timestamp = millis_to_utc(self.0).map_err(|e| ProviderError::Parse(e.to_string()))?;
        let mut candle = Candle::new(
            "binance",
            symbol,
            timeframe,
            timestamp,
            decimal("open", &self.1)?,
            decimal("high", &self.2)?,
            decimal("low", &self.3)?,
            decimal("close", &self.4)?,
            decimal("volume", &self.5)?,
        );
        candle.quote_volume = Some(decimal("quote_volume", &self.7)?);
        candle.trades_count = Some(self.8);
        candle.taker_buy_volume = Some(decimal("taker_buy_volume", &self.9)?);
        candle.taker_buy_quote_volume = Some(decimal("taker_buy_quote_volume", &self.10)?);
        Ok(candle)
    }
}

/// `/api/v3/ticker/24hr` for a single symbol
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub price_change_percent: String,
    pub last_price: String,
    pub bid_price: String,
    pub ask_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub close_time: i64,
}

impl Ticker24h {
    pub fn into_ticker(self, symbol: &str) -> ProviderResult<trading_common::data::Ticker> {
        Ok(trading_common::data::Ticker {
            exchange: "binance".to_string(),
            symbol: symbol.to_string(),
            last: decimal("lastPrice", &self.last_price)?,
            bid: Some(decimal("bidPrice", &self.bid_price)?),
            ask: Some(decimal("askPrice", &self.ask_price)?),
            high: Some(decimal("highPrice", &self.high_price)?),
            low: Some(decimal("lowPrice", &self.low_price)?),
            volume: decimal("volume", &self.volume)?,
            quote_volume: Some(decimal("quoteVolume", &self.quote_volume)?),
            change_percent: Some(decimal("priceChangePercent", &self.price_change_percent)?),
            timestamp: millis_to_utc(self.close_time).unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// `/api/v3/depth` snapshot; levels are `[price, quantity]` strings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

pub fn parse_levels(levels: &[[String; 2]]) -> ProviderResult<Vec<BookLevel>> {
    levels
        .iter()
        .map(|[price, quantity]| {
            Ok(BookLevel {
                price: decimal("price", price)?,
                quantity: decimal("quantity", quantity)?,
            })
        })
        .collect()
}

/// `/api/v3/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl SymbolInfo {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const KLINES: &str = r#"[
        [1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
         "148976.11427815", 1499644799999, "2434.19055334", 308,
         "1756.87402397", "28.46694368", "0"]
    ]"#;

    #[test]
    fn test_parse_kline_row() {
        let rows: Vec<KlineRow> = serde_json::from_str(KLINES).unwrap();
        let candle = rows
            .into_iter()
            .next()
            .unwrap()
            .into_candle("LTC/BTC", Timeframe::OneDay)
            .unwrap();

        assert_eq!(candle.exchange, "binance");
        assert_eq!(candle.timestamp_millis(), 1499040000000);
        assert_eq!(candle.high, dec!(0.80000000));
        assert_eq!(candle.trades_count, Some(308));
        assert_eq!(candle.taker_buy_quote_volume, Some(dec!(28.46694368)));
    }

    #[test]
    fn test_bad_decimal_is_parse_error() {
        let json = r#"[[1499040000000, "abc", "1", "1", "1", "1", 1, "1", 1, "1", "1", "0"]]"#;
        let rows: Vec<KlineRow> = serde_json::from_str(json).unwrap();
        let err = rows[0].clone().into_candle("LTC/BTC", Timeframe::OneDay).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn test_parse_depth() {
        let json = r#"{"lastUpdateId": 1027024, "bids": [["4.00000000", "431.00000000"]], "asks": [["4.00000200", "12.00000000"]]}"#;
        let depth: DepthSnapshot = serde_json::from_str(json).unwrap();
        let bids = parse_levels(&depth.bids).unwrap();
        assert_eq!(bids[0].price, dec!(4));
        assert_eq!(bids[0].quantity, dec!(431));
    }

    #[test]
    fn test_parse_exchange_info() {
        let json = r#"{"timezone": "UTC", "symbols": [
            {"symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "BTC"},
            {"symbol": "OLDBTC", "status": "BREAK", "baseAsset": "OLD", "quoteAsset": "BTC"}
        ]}"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.symbols.iter().filter(|s| s.is_trading()).count(), 1);
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigurationError;

/// Data model errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DataError {
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decimal conversion error: {0}")]
    DecimalConversion(#[from] rust_decimal::Error),

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

pub type DataResult<T> = Result<T, DataError>;

/// Candle bucket width.
///
/// Identifiers match the exchange wire format (`1m`, `4h`, `1w`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
}

/// 1970-01-05 00:00 UTC, the first Monday after the epoch. Weekly buckets open on Mondays.
const FIRST_MONDAY_MS: i64 = 4 * 24 * 60 * 60 * 1000;

impl Timeframe {
    pub const ALL: [Timeframe; 13] = [
        Timeframe::OneMinute,
        Timeframe::ThreeMinutes,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::ThirtyMinutes,
        Timeframe::OneHour,
        Timeframe::TwoHours,
        Timeframe::FourHours,
        Timeframe::SixHours,
        Timeframe::TwelveHours,
        Timeframe::OneDay,
        Timeframe::ThreeDays,
        Timeframe::OneWeek,
    ];

    pub fn as_duration(&self) -> Duration {
        match self {
            Timeframe::OneMinute => Duration::minutes(1),
            Timeframe::ThreeMinutes => Duration::minutes(3),
            Timeframe::FiveMinutes => Duration::minutes(5),
            Timeframe::FifteenMinutes => Duration::minutes(15),
            Timeframe::ThirtyMinutes => Duration::minutes(30),
            Timeframe::OneHour => Duration::hours(1),
            Timeframe::TwoHours => Duration::hours(2),
            Timeframe::FourHours => Duration::hours(4),
            Timeframe::SixHours => Duration::hours(6),
            Timeframe::TwelveHours => Duration::hours(12),
            Timeframe::OneDay => Duration::days(1),
            Timeframe::ThreeDays => Duration::days(3),
            Timeframe::OneWeek => Duration::weeks(1),
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.as_duration().num_milliseconds()
    }

    pub fn as_secs(&self) -> i64 {
        self.as_duration().num_seconds()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::ThreeMinutes => "3m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::TwoHours => "2h",
            Timeframe::FourHours => "4h",
            Timeframe::SixHours => "6h",
            Timeframe::TwelveHours => "12h",
            Timeframe::OneDay => "1d",
            Timeframe::ThreeDays => "3d",
            Timeframe::OneWeek => "1w",
        }
    }

    /// Floor a timestamp to the start of its bucket.
    pub fn align(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let ms = timestamp.timestamp_millis();
        let width = self.as_millis();
        let origin = match self {
            Timeframe::OneWeek => FIRST_MONDAY_MS,
            _ => 0,
        };
        let aligned = origin + (ms - origin).div_euclid(width) * width;
        // Flooring never leaves chrono's representable range.
        Utc.timestamp_millis_opt(aligned).single().unwrap_or(timestamp)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| ConfigurationError::InvalidValue {
                field: "timeframe".to_string(),
                reason: format!(
                    "unsupported timeframe '{}' (expected one of: {})",
                    s,
                    Timeframe::ALL.map(|tf| tf.as_str()).join(", ")
                ),
            })
    }
}

/// Identity of a stored candle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandleKey {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
}

/// Identity of a candle series (a key without the timestamp)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// Symbol with the pair separator replaced, safe for file names (`BTC/USDT` -> `BTC_USDT`)
    pub fn symbol_slug(&self) -> String {
        symbol_slug(&self.symbol)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.exchange, self.symbol, self.timeframe)
    }
}

pub fn symbol_slug(symbol: &str) -> String {
    symbol.replace('/', "_")
}

/// Canonical OHLCV record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Candle open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trades_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_volume: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_quote_volume: Option<Decimal>,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            timeframe,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: None,
            trades_count: None,
            taker_buy_volume: None,
            taker_buy_quote_volume: None,
        }
    }

    pub fn key(&self) -> CandleKey {
        CandleKey {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            timestamp: self.timestamp,
        }
    }

    pub fn series(&self) -> SeriesKey {
        SeriesKey::new(self.exchange.clone(), self.symbol.clone(), self.timeframe)
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// 24h ticker snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub exchange: String,
    pub symbol: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Decimal,
    pub quote_volume: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot, bids descending and asks ascending
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBook {
    pub exchange: String,
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

/// Convert epoch milliseconds into a UTC timestamp
pub fn millis_to_utc(ms: i64) -> DataResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(DataError::TimestampOutOfRange(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_round_trip_all_ids() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn test_timeframe_rejects_unknown() {
        assert!("2m".parse::<Timeframe>().is_err());
        assert!("1H".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_serde_uses_wire_ids() {
        let json = serde_json::to_string(&Timeframe::FourHours).unwrap();
        assert_eq!(json, "\"4h\"");
        let tf: Timeframe = serde_json::from_str("\"1w\"").unwrap();
        assert_eq!(tf, Timeframe::OneWeek);
    }

    #[test]
    fn test_align_hour_and_minutes() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 13, 47, 12).unwrap();
        assert_eq!(
            Timeframe::OneHour.align(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap()
        );
        assert_eq!(
            Timeframe::FifteenMinutes.align(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 13, 45, 0).unwrap()
        );
        assert_eq!(
            Timeframe::FourHours.align(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_align_week_starts_on_monday() {
        // 2024-03-07 is a Thursday
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 9, 30, 0).unwrap();
        assert_eq!(
            Timeframe::OneWeek.align(ts),
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_symbol_slug() {
        let key = SeriesKey::new("binance", "BTC/USDT", Timeframe::OneHour);
        assert_eq!(key.symbol_slug(), "BTC_USDT");
        assert_eq!(key.to_string(), "binance BTC/USDT 1h");
    }

    #[test]
    fn test_order_book_spread() {
        let book = OrderBook {
            exchange: "binance".into(),
            symbol: "BTC/USDT".into(),
            bids: vec![BookLevel {
                price: Decimal::new(100, 0),
                quantity: Decimal::ONE,
            }],
            asks: vec![BookLevel {
                price: Decimal::new(1015, 1),
                quantity: Decimal::ONE,
            }],
            timestamp: Utc::now(),
        };
        assert_eq!(book.spread(), Some(Decimal::new(15, 1)));
    }
}

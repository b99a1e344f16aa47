//! Binance stream frames
//!
//! Every inbound text frame is decoded into a [`Frame`]. Event payloads are a
//! serde enum tagged on the `e` field; anything that matches no known shape is
//! rejected at this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trading_common::data::{millis_to_utc, Candle, OrderBook, Ticker, Timeframe};

use crate::provider::binance::parse_levels;
use crate::provider::{decimal, Pair, ProviderError, ProviderResult};

pub const EXCHANGE_ID: &str = "binance";

/// Market data event, tagged on `e`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "e")]
pub enum StreamMessage {
    #[serde(rename = "kline")]
    Kline(KlineEvent),
    #[serde(rename = "24hrTicker")]
    Ticker(TickerEvent),
    #[serde(rename = "depthUpdate")]
    Depth(DepthEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KlinePayload {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q", default)]
    pub quote_volume: Option<String>,
    #[serde(rename = "n", default)]
    pub trades_count: Option<u64>,
    #[serde(rename = "V", default)]
    pub taker_buy_volume: Option<String>,
    #[serde(rename = "Q", default)]
    pub taker_buy_quote_volume: Option<String>,
    /// Final update for this candle
    #[serde(rename = "x")]
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last: String,
    #[serde(rename = "b", default)]
    pub bid: Option<String>,
    #[serde(rename = "a", default)]
    pub ask: Option<String>,
    #[serde(rename = "h", default)]
    pub high: Option<String>,
    #[serde(rename = "l", default)]
    pub low: Option<String>,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q", default)]
    pub quote_volume: Option<String>,
    #[serde(rename = "P", default)]
    pub change_percent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DepthEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerError {
    pub code: i64,
    pub msg: String,
}

/// Any text frame the server may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// `/stream?streams=` wrapper
    Combined { stream: String, data: StreamMessage },
    /// Reply to SUBSCRIBE / UNSUBSCRIBE
    Ack { result: Option<Value>, id: u64 },
    Error { error: ServerError, id: Option<u64> },
    Event(StreamMessage),
}

impl Frame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Outbound control request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlRequest {
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u64,
}

impl ControlRequest {
    pub fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params,
            id,
        }
    }

    pub fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE",
            params,
            id,
        }
    }
}

/// `btcusdt@kline_1m`
pub fn kline_channel(symbol: &str, timeframe: Timeframe) -> ProviderResult<String> {
    Ok(format!("{}@kline_{}", Pair::parse(symbol)?.binance_stream(), timeframe))
}

/// `btcusdt@ticker`
pub fn ticker_channel(symbol: &str) -> ProviderResult<String> {
    Ok(format!("{}@ticker", Pair::parse(symbol)?.binance_stream()))
}

/// `btcusdt@depth@100ms`
pub fn depth_channel(symbol: &str) -> ProviderResult<String> {
    Ok(format!("{}@depth@100ms", Pair::parse(symbol)?.binance_stream()))
}

fn timestamp(field: &str, ms: i64) -> ProviderResult<DateTime<Utc>> {
    millis_to_utc(ms).map_err(|e| ProviderError::Parse(format!("{}: {}", field, e)))
}

fn optional(field: &str, raw: &Option<String>) -> ProviderResult<Option<rust_decimal::Decimal>> {
    raw.as_deref().map(|r| decimal(field, r)).transpose()
}

impl KlineEvent {
    pub fn is_closed(&self) -> bool {
        self.kline.closed
    }

    pub fn to_candle(&self) -> ProviderResult<Candle> {
        let k = &self.kline;
        let timeframe: Timeframe = k
            .interval
            .parse()
            .map_err(|e| ProviderError::Parse(format!("kline interval: {}", e)))?;

        let mut candle = Candle::new(
            EXCHANGE_ID,
            Pair::parse(&self.symbol)?.canonical(),
            timeframe,
            timestamp("kline open time", k.open_time)?,
            decimal("open", &k.open)?,
            decimal("high", &k.high)?,
            decimal("low", &k.low)?,
            decimal("close", &k.close)?,
            decimal("volume", &k.volume)?,
        );
        candle.quote_volume = optional("quote_volume", &k.quote_volume)?;
        candle.trades_count = k.trades_count;
        candle.taker_buy_volume = optional("taker_buy_volume", &k.taker_buy_volume)?;
        candle.taker_buy_quote_volume = optional("taker_buy_quote_volume", &k.taker_buy_quote_volume)?;
        Ok(candle)
    }
}

impl TickerEvent {
    pub fn to_ticker(&self) -> ProviderResult<Ticker> {
        Ok(Ticker {
            exchange: EXCHANGE_ID.to_string(),
            symbol: Pair::parse(&self.symbol)?.canonical(),
            last: decimal("last", &self.last)?,
            bid: optional("bid", &self.bid)?,
            ask: optional("ask", &self.ask)?,
            high: optional("high", &self.high)?,
            low: optional("low", &self.low)?,
            volume: decimal("volume", &self.volume)?,
            quote_volume: optional("quote_volume", &self.quote_volume)?,
            change_percent: optional("change_percent", &self.change_percent)?,
            timestamp: timestamp("event time", self.event_time)?,
        })
    }
}

impl DepthEvent {
    /// The update as a book of changed levels. A zero quantity removes a level.
    pub fn to_order_book(&self) -> ProviderResult<OrderBook> {
        Ok(OrderBook {
            exchange: EXCHANGE_ID.to_string(),
            symbol: Pair::parse(&self.symbol)?.canonical(),
            bids: parse_levels(&self.bids)?,
            asks: parse_levels(&self.asks)?,
            timestamp: timestamp("event time", self.event_time)?,
        })
    }
}

//! Binance spot connector
//!
//! REST klines, ticker, depth and exchange info. The WebSocket feed lives in
//! `crate::stream`.

mod client;
mod types;

pub use client::BinanceConnector;
pub use types::{parse_levels, DepthSnapshot, ExchangeInfo, KlineRow, SymbolInfo, Ticker24h};

//! Coinbase Exchange connector (public REST endpoints)

mod client;
mod types;

pub use client::CoinbaseConnector;
pub use types::{CandleRow, Product, ProductBook, ProductTicker};

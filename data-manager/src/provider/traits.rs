//! Exchange connector contract
//!
//! One implementing type per exchange. Connectors fetch a single page per
//! call and never retry; paging and retry belong to the range fetcher.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use trading_common::data::{CandleBatch, OrderBook, Ticker, Timeframe};
use trading_common::error::{ConfigurationError, ErrorCategory, ErrorClassification, NetworkError};

/// Provider error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    /// Timeout, refused connection, reset, DNS
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// The exchange answered but rejected the request
    #[error("Exchange error{}: {message}", http_status(.status))]
    Exchange { status: Option<u16>, message: String },

    #[error("Rate limited by exchange")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeframe {timeframe} is not supported by {exchange}")]
    UnsupportedTimeframe {
        exchange: String,
        timeframe: Timeframe,
    },

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl ErrorClassification for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Network(_) => ErrorCategory::Transient,
            ProviderError::Exchange { status, .. } => match status {
                Some(code) if *code >= 500 => ErrorCategory::Transient,
                _ => ErrorCategory::Permanent,
            },
            ProviderError::RateLimited { .. } => ErrorCategory::ResourceExhausted,
            ProviderError::InvalidArgument(_) => ErrorCategory::Configuration,
            ProviderError::UnsupportedTimeframe { .. } => ErrorCategory::Configuration,
            ProviderError::Parse(_) => ErrorCategory::Permanent,
            ProviderError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => {
                Some(retry_after.unwrap_or(Duration::from_secs(60)))
            }
            ProviderError::Network(inner) => inner.suggested_retry_delay(),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Capability interface implemented once per exchange.
///
/// Symbols are canonical `BASE/QUOTE` on both sides of the trait; each
/// connector converts to its venue format internally.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Lowercase exchange id stored with every candle (`binance`, `coinbase`)
    fn exchange_id(&self) -> &str;

    /// Largest page the exchange serves per request
    fn max_page_size(&self) -> usize;

    /// Fixed pause between consecutive pages of a range fetch
    fn page_delay(&self) -> Duration;

    fn get_timeframes(&self) -> Vec<Timeframe>;

    fn supports_timeframe(&self, timeframe: Timeframe) -> bool {
        self.get_timeframes().contains(&timeframe)
    }

    /// Fail with `UnsupportedTimeframe` before any network call.
    fn ensure_timeframe(&self, timeframe: Timeframe) -> ProviderResult<()> {
        if self.supports_timeframe(timeframe) {
            Ok(())
        } else {
            Err(ProviderError::UnsupportedTimeframe {
                exchange: self.exchange_id().to_string(),
                timeframe,
            })
        }
    }

    /// Requested page size clamped into `1..=max_page_size`.
    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(1, self.max_page_size().max(1))
    }

    /// One page of candles opening at or after `since`, ascending.
    ///
    /// `limit` is clamped to the exchange maximum rather than rejected. An
    /// empty batch means no data at or after `since`.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ProviderResult<CandleBatch>;

    async fn fetch_ticker(&self, symbol: &str) -> ProviderResult<Ticker>;

    async fn fetch_order_book(&self, symbol: &str, limit: usize) -> ProviderResult<OrderBook>;

    /// All tradable symbols, canonical form, sorted
    async fn get_symbols(&self) -> ProviderResult<Vec<String>>;

    async fn validate_symbol(&self, symbol: &str) -> ProviderResult<bool> {
        Ok(self.get_symbols().await?.iter().any(|s| s == symbol))
    }
}

//! Scripted connector for tests and offline runs
//!
//! Serves candles from an in-memory history (or a queue of fixed pages),
//! records every call, and can inject failures or fire a shutdown signal
//! after a given number of pages.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use trading_common::data::{BookLevel, Candle, CandleBatch, OrderBook, Ticker, Timeframe};
use trading_common::error::NetworkError;

use crate::provider::{ExchangeConnector, ProviderError, ProviderResult};

/// One recorded `fetch_ohlcv` call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Failure to inject; `ProviderError` is not `Clone`, so the stub builds a
/// fresh error from this description each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Timeout,
    ServerError,
    RateLimited,
    BadRequest,
    /// Configuration-category failure; never retried
    InvalidArgument,
}

impl InjectedFailure {
    fn to_error(self) -> ProviderError {
        match self {
            InjectedFailure::Timeout => {
                ProviderError::Network(NetworkError::Timeout(Duration::from_secs(30)))
            }
            InjectedFailure::ServerError => ProviderError::Exchange {
                status: Some(503),
                message: "service unavailable".to_string(),
            },
            InjectedFailure::RateLimited => ProviderError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            },
            InjectedFailure::BadRequest => ProviderError::Exchange {
                status: Some(400),
                message: "Invalid symbol.".to_string(),
            },
            InjectedFailure::InvalidArgument => {
                ProviderError::InvalidArgument("limit out of range".to_string())
            }
        }
    }
}

#[derive(Default)]
struct StubState {
    pages: VecDeque<Vec<Candle>>,
    failures: VecDeque<InjectedFailure>,
    calls: Vec<FetchCall>,
    served_pages: usize,
    interrupt: Option<(usize, broadcast::Sender<()>)>,
}

pub struct StubConnector {
    exchange: String,
    history: Vec<Candle>,
    max_page_size: usize,
    timeframes: Vec<Timeframe>,
    failing_cursors: HashSet<DateTime<Utc>>,
    symbols: Vec<String>,
    scripted: bool,
    state: Mutex<StubState>,
}

impl StubConnector {
    /// Serve pages cut from `history`: candles at or after `since`, in the
    /// order given, `limit` at a time. Duplicates and invalid rows in the
    /// history are served as-is.
    pub fn with_history(exchange: &str, history: Vec<Candle>) -> Self {
        let mut symbols: Vec<String> = history.iter().map(|c| c.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        Self {
            exchange: exchange.to_string(),
            history,
            max_page_size: 1000,
            timeframes: Timeframe::ALL.to_vec(),
            failing_cursors: HashSet::new(),
            symbols,
            scripted: false,
            state: Mutex::new(StubState::default()),
        }
    }

    /// Serve `pages` in order regardless of the requested cursor, then empty
    /// pages.
    pub fn with_pages(exchange: &str, pages: Vec<Vec<Candle>>) -> Self {
        let mut stub = Self::with_history(exchange, pages.iter().flatten().cloned().collect());
        stub.scripted = true;
        stub.state.lock().pages = pages.into();
        stub
    }

    pub fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    pub fn timeframes(mut self, timeframes: Vec<Timeframe>) -> Self {
        self.timeframes = timeframes;
        self
    }

    /// Fail the next calls, one failure per call, before serving data again.
    pub fn fail_next(self, failures: impl IntoIterator<Item = InjectedFailure>) -> Self {
        self.state.lock().failures.extend(failures);
        self
    }

    /// Every fetch whose cursor equals `since` fails with a server error.
    pub fn fail_at(mut self, since: DateTime<Utc>) -> Self {
        self.failing_cursors.insert(since);
        self
    }

    /// Send on `shutdown` once `pages` non-empty pages have been served.
    pub fn interrupt_after(self, pages: usize, shutdown: broadcast::Sender<()>) -> Self {
        self.state.lock().interrupt = Some((pages, shutdown));
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.state.lock().calls.clone()
    }

    fn history_page(&self, symbol: &str, since: Option<DateTime<Utc>>, limit: usize) -> Vec<Candle> {
        self.history
            .iter()
            .filter(|c| c.symbol == symbol)
            .filter(|c| since.map_or(true, |s| c.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExchangeConnector for StubConnector {
    fn exchange_id(&self) -> &str {
        &self.exchange
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    fn page_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn get_timeframes(&self) -> Vec<Timeframe> {
        self.timeframes.clone()
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ProviderResult<CandleBatch> {
        self.ensure_timeframe(timeframe)?;
        let limit = self.clamp_limit(limit);

        let mut state = self.state.lock();
        state.calls.push(FetchCall {
            symbol: symbol.to_string(),
            timeframe,
            since,
            limit,
        });

        if let Some(failure) = state.failures.pop_front() {
            return Err(failure.to_error());
        }
        if since.map_or(false, |s| self.failing_cursors.contains(&s)) {
            return Err(InjectedFailure::ServerError.to_error());
        }

        let page = match state.pages.pop_front() {
            Some(page) => page,
            None if self.scripted => Vec::new(),
            None => self.history_page(symbol, since, limit),
        };

        if !page.is_empty() {
            state.served_pages += 1;
            if let Some((after, shutdown)) = &state.interrupt {
                if state.served_pages >= *after {
                    let _ = shutdown.send(());
                }
            }
        }

        Ok(CandleBatch::new(page))
    }

    async fn fetch_ticker(&self, symbol: &str) -> ProviderResult<Ticker> {
        let last = self
            .history
            .iter()
            .filter(|c| c.symbol == symbol)
            .max_by_key(|c| c.timestamp)
            .ok_or_else(|| ProviderError::InvalidArgument(format!("unknown symbol: {}", symbol)))?;
        Ok(Ticker {
            exchange: self.exchange.clone(),
            symbol: symbol.to_string(),
            last: last.close,
            bid: Some(last.close),
            ask: Some(last.close),
            high: Some(last.high),
            low: Some(last.low),
            volume: last.volume,
            quote_volume: last.quote_volume,
            change_percent: None,
            timestamp: last.timestamp,
        })
    }

    async fn fetch_order_book(&self, symbol: &str, limit: usize) -> ProviderResult<OrderBook> {
        let ticker = self.fetch_ticker(symbol).await?;
        let step = Decimal::new(1, 2);
        let level = |i: usize, sign: Decimal| BookLevel {
            price: ticker.last + sign * step * Decimal::from(i as u64 + 1),
            quantity: Decimal::ONE,
        };
        Ok(OrderBook {
            exchange: self.exchange.clone(),
            symbol: symbol.to_string(),
            bids: (0..limit).map(|i| level(i, Decimal::NEGATIVE_ONE)).collect(),
            asks: (0..limit).map(|i| level(i, Decimal::ONE)).collect(),
            timestamp: ticker.timestamp,
        })
    }

    async fn get_symbols(&self) -> ProviderResult<Vec<String>> {
        Ok(self.symbols.clone())
    }
}

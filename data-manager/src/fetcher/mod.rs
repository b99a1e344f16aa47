//! Range fetcher
//!
//! Covers an arbitrary `[start, end]` range by paging through a connector:
//! the cursor advances to `last_timestamp + interval` after every page, a page
//! that keeps failing after retries is skipped by one batch width, and the
//! loop ends when the cursor passes `end` or a page comes back empty.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use trading_common::data::{Candle, CandleBatch, Timeframe};
use trading_common::error::{ErrorCategory, ErrorClassification};
use trading_common::retry::{retry, RetryPolicy};

use crate::provider::{ExchangeConnector, ProviderError};

#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Page size; defaults to the connector's maximum
    pub batch_size: Option<usize>,
}

impl RangeRequest {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            start,
            end,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// A page abandoned after exhausting retries
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedBatch {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub error: String,
}

/// Progress of a streamed range fetch
#[derive(Debug, Clone, Default)]
pub struct DriveReport {
    pub pages: usize,
    pub candles: usize,
    pub skipped: Vec<SkippedBatch>,
    pub cancelled: bool,
}

/// Result of `fetch_range`: deduplicated on timestamp (first wins) and sorted
#[derive(Debug, Clone)]
pub struct RangeOutcome {
    pub candles: CandleBatch,
    pub skipped: Vec<SkippedBatch>,
    pub pages: usize,
    pub cancelled: bool,
}

#[derive(Error, Debug)]
pub enum FetchError<E = Infallible> {
    /// Configuration-category provider error; never retried
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("page sink failed: {0}")]
    Sink(E),
}

impl<E: ErrorClassification> ErrorClassification for FetchError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Provider(e) => e.category(),
            FetchError::Sink(e) => e.category(),
        }
    }
}

/// Receives each page, clipped to the requested range, before the cursor
/// moves on. An error aborts the range.
#[async_trait]
pub trait PageSink: Send {
    type Error: Send;

    async fn accept(&mut self, page: CandleBatch) -> Result<(), Self::Error>;
}

/// Sink that keeps every page in memory
#[derive(Debug, Default)]
pub struct CollectSink {
    candles: Vec<Candle>,
}

impl CollectSink {
    pub fn into_batch(self) -> CandleBatch {
        CandleBatch::new(self.candles)
    }
}

#[async_trait]
impl PageSink for CollectSink {
    type Error = Infallible;

    async fn accept(&mut self, page: CandleBatch) -> Result<(), Infallible> {
        self.candles.extend(page.iter().cloned());
        Ok(())
    }
}

pub struct RangeFetcher {
    connector: Arc<dyn ExchangeConnector>,
    policy: RetryPolicy,
}

impl RangeFetcher {
    pub fn new(connector: Arc<dyn ExchangeConnector>, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn connector(&self) -> &Arc<dyn ExchangeConnector> {
        &self.connector
    }

    /// Fetch the whole range into memory.
    pub async fn fetch_range(
        &self,
        request: &RangeRequest,
        shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> Result<RangeOutcome, FetchError> {
        let mut sink = CollectSink::default();
        let report = self.drive(request, &mut sink, shutdown).await?;
        let candles = sink.into_batch().dedup_keep_first().sorted();

        info!(
            symbol = %request.symbol,
            timeframe = %request.timeframe,
            candles = candles.len(),
            pages = report.pages,
            skipped = report.skipped.len(),
            "range fetched"
        );

        Ok(RangeOutcome {
            candles,
            skipped: report.skipped,
            pages: report.pages,
            cancelled: report.cancelled,
        })
    }

    /// Page through the range, handing each page to `sink`.
    pub async fn drive<S: PageSink>(
        &self,
        request: &RangeRequest,
        sink: &mut S,
        mut shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> Result<DriveReport, FetchError<S::Error>> {
        self.connector.ensure_timeframe(request.timeframe)?;

        let interval = request.timeframe.as_duration();
        let batch_size = self
            .connector
            .clamp_limit(request.batch_size.unwrap_or_else(|| self.connector.max_page_size()));
        let batch_width = interval * batch_size as i32;
        let page_delay = self.connector.page_delay();

        let mut report = DriveReport::default();
        let mut cursor = request.start;

        debug!(
            exchange = self.connector.exchange_id(),
            symbol = %request.symbol,
            timeframe = %request.timeframe,
            start = %request.start,
            end = %request.end,
            batch_size,
            "starting range fetch"
        );

        while cursor < request.end {
            if let Some(rx) = shutdown.as_deref_mut() {
                if shutdown_requested(rx) {
                    info!(symbol = %request.symbol, cursor = %cursor, "range fetch cancelled");
                    report.cancelled = true;
                    break;
                }
            }

            let fetched = retry(&self.policy, |_| {
                self.connector.fetch_ohlcv(
                    &request.symbol,
                    request.timeframe,
                    Some(cursor),
                    batch_size,
                )
            })
            .await;

            let page = match fetched {
                Ok(page) => page,
                Err(err) if err.is_configuration() => return Err(FetchError::Provider(err)),
                Err(err) => {
                    let skip_to = cursor + batch_width;
                    warn!(
                        symbol = %request.symbol,
                        from = %cursor,
                        to = %skip_to,
                        error = %err,
                        "page failed after retries, skipping batch"
                    );
                    report.skipped.push(SkippedBatch {
                        start: cursor,
                        end: skip_to,
                        error: err.to_string(),
                    });
                    cursor = skip_to;
                    continue;
                }
            };

            let Some(last) = page.last_timestamp() else {
                debug!(symbol = %request.symbol, cursor = %cursor, "no more data");
                break;
            };

            let clipped: CandleBatch = page
                .iter()
                .filter(|c| c.timestamp <= request.end)
                .cloned()
                .collect();

            report.pages += 1;
            report.candles += clipped.len();
            if !clipped.is_empty() {
                sink.accept(clipped).await.map_err(FetchError::Sink)?;
            }

            // Always move forward, even if the exchange returned stale rows
            cursor = (last + interval).max(cursor + interval);

            if cursor < request.end && !page_delay.is_zero() {
                tokio::time::sleep(page_delay).await;
            }
        }

        Ok(report)
    }
}

fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    match rx.try_recv() {
        Ok(()) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
    }
}

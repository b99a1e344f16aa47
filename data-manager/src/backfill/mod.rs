//! Historical backfill pipeline
//!
//! Fetch a `[now - days, now]` range page by page, validate each page, upsert
//! the valid rows, and checkpoint after every persisted page. Invalid rows are
//! collected and dead-lettered once per run. A completed range removes its
//! checkpoint; anything else leaves one behind for `--resume`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use trading_common::data::{CandleBatch, RejectedCandle, SeriesKey, Timeframe};
use trading_common::error::ConfigurationError;
use trading_common::retry::RetryPolicy;

use crate::archive::ColumnarArchive;
use crate::checkpoint::{CheckpointStore, DeadLetterStore};
use crate::config::Settings;
use crate::error::{PipelineError, PipelineResult};
use crate::fetcher::{PageSink, RangeFetcher, RangeRequest, SkippedBatch};
use crate::provider::{symbol, Exchange, ExchangeConnector};
use crate::storage::{InsertMode, IntegritySummary, TimeSeriesStore};

#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub exchange: Exchange,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub days: u32,
    pub export_to_archive: bool,
    pub resume: bool,
    pub batch_size: Option<usize>,
    /// End of the range; defaults to now
    pub end: Option<DateTime<Utc>>,
}

impl BackfillRequest {
    pub fn new(exchange: Exchange, symbol: impl Into<String>, timeframe: Timeframe, days: u32) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            timeframe,
            days,
            export_to_archive: true,
            resume: false,
            batch_size: None,
            end: None,
        }
    }

    pub fn ending_at(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }
}

#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub series: SeriesKey,
    pub requested_start: DateTime<Utc>,
    /// Start actually fetched from; later than `requested_start` on resume
    pub effective_start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub pages: usize,
    pub fetched: usize,
    pub inserted: u64,
    pub rejected: usize,
    pub skipped: Vec<SkippedBatch>,
    pub cancelled: bool,
    pub archived_files: Vec<PathBuf>,
    pub dead_letter: Option<PathBuf>,
    pub integrity: Option<IntegritySummary>,
}

impl BackfillReport {
    pub fn completed(&self) -> bool {
        !self.cancelled
    }
}

/// Shared state for every backfill run against one data directory
pub struct BackfillPipeline {
    store: Arc<TimeSeriesStore>,
    archive: ColumnarArchive,
    checkpoints: CheckpointStore,
    dead_letters: DeadLetterStore,
    policy: RetryPolicy,
}

impl BackfillPipeline {
    pub fn new(
        store: Arc<TimeSeriesStore>,
        archive: ColumnarArchive,
        checkpoints: CheckpointStore,
        dead_letters: DeadLetterStore,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            archive,
            checkpoints,
            dead_letters,
            policy,
        }
    }

    pub fn from_settings(store: Arc<TimeSeriesStore>, settings: &Settings) -> Self {
        Self::new(
            store,
            ColumnarArchive::new(&settings.storage.archive_root),
            CheckpointStore::new(&settings.storage.checkpoint_dir),
            DeadLetterStore::new(&settings.storage.dead_letter_dir),
            settings.fetch.retry_policy(),
        )
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Run one backfill. Cancellation via `shutdown` stops between pages and
    /// keeps the checkpoint.
    pub async fn run(
        &self,
        connector: Arc<dyn ExchangeConnector>,
        request: &BackfillRequest,
        shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> PipelineResult<BackfillReport> {
        if request.days == 0 {
            return Err(ConfigurationError::invalid_value("days", "must be at least 1").into());
        }
        connector.ensure_timeframe(request.timeframe)?;

        let symbol = symbol::canonical(&request.symbol)?;
        let series = SeriesKey::new(request.exchange.as_str(), symbol.clone(), request.timeframe);
        let end = request.end.unwrap_or_else(Utc::now);
        let requested_start = end - Duration::days(i64::from(request.days));

        let resume_from = if request.resume {
            self.checkpoints.load(&series)?
        } else {
            None
        };
        let (effective_start, base_count) = match &resume_from {
            Some(cp) => {
                info!(
                    series = %series,
                    from = %cp.last_timestamp,
                    records = cp.record_count,
                    "resuming from checkpoint"
                );
                (cp.last_timestamp, cp.record_count)
            }
            None => (requested_start, 0),
        };

        info!(
            series = %series,
            start = %effective_start,
            end = %end,
            "starting backfill"
        );

        let range = RangeRequest::new(symbol.clone(), request.timeframe, effective_start, end)
            .with_batch_size(request.batch_size);
        let fetcher = RangeFetcher::new(connector, self.policy.clone());
        let mut sink = BackfillSink {
            store: &self.store,
            checkpoints: &self.checkpoints,
            series: &series,
            persisted: base_count,
            inserted: 0,
            rejected: Vec::new(),
            checkpointed: false,
        };

        let driven = fetcher.drive(&range, &mut sink, shutdown).await;

        let rejected = sink.rejected.len();
        let dead_letter = self.dead_letters.deadletter(
            &sink.rejected,
            &format!("OHLC validation failed during backfill of {}", series),
        );

        let drive = match driven {
            Ok(drive) => drive,
            Err(err) => {
                let err = PipelineError::from(err);
                if !sink.checkpointed && resume_from.is_none() {
                    if let Err(e) = self.checkpoints.save(&series, effective_start, base_count) {
                        warn!(series = %series, error = %e, "could not write checkpoint after failure");
                    }
                }
                error!(series = %series, error = %err, "backfill failed");
                return Err(err);
            }
        };

        let mut report = BackfillReport {
            series: series.clone(),
            requested_start,
            effective_start,
            end,
            pages: drive.pages,
            fetched: drive.candles,
            inserted: sink.inserted,
            rejected,
            skipped: drive.skipped,
            cancelled: drive.cancelled,
            archived_files: Vec::new(),
            dead_letter,
            integrity: None,
        };

        if report.cancelled {
            warn!(
                series = %series,
                inserted = report.inserted,
                "backfill interrupted, checkpoint kept for resume"
            );
            return Ok(report);
        }

        if request.export_to_archive {
            let rows = self
                .store
                .query(&symbol, request.timeframe, request.exchange.as_str(), Some(requested_start), Some(end))
                .await?;
            if !rows.is_empty() {
                report.archived_files = self.archive.write_partition(
                    &rows,
                    request.exchange.as_str(),
                    &symbol,
                    request.timeframe,
                )?;
                info!(series = %series, rows = rows.len(), files = report.archived_files.len(), "exported to archive");
            }
        }

        let summary = self
            .store
            .validate_integrity(&symbol, request.timeframe, request.exchange.as_str())
            .await?;
        if summary.has_issues() {
            warn!(
                series = %series,
                invalid_ohlc = summary.invalid_ohlc_count,
                duplicates = summary.duplicate_count,
                gaps = summary.gap_count,
                missing = summary.missing_candles,
                "integrity issues after backfill"
            );
        }
        for row in self.store.coverage().await?.iter().filter(|r| r.series == series) {
            info!(
                series = %row.series,
                first = %row.first_timestamp,
                last = %row.last_timestamp,
                candles = row.total_candles,
                days = row.days_covered,
                "coverage"
            );
        }
        report.integrity = Some(summary);

        self.checkpoints.delete(&series)?;

        info!(
            series = %series,
            pages = report.pages,
            fetched = report.fetched,
            inserted = report.inserted,
            rejected = report.rejected,
            skipped = report.skipped.len(),
            "backfill complete"
        );
        Ok(report)
    }
}

/// Validates, upserts and checkpoints each fetched page
struct BackfillSink<'a> {
    store: &'a TimeSeriesStore,
    checkpoints: &'a CheckpointStore,
    series: &'a SeriesKey,
    persisted: u64,
    inserted: u64,
    rejected: Vec<RejectedCandle>,
    checkpointed: bool,
}

#[async_trait]
impl PageSink for BackfillSink<'_> {
    type Error = PipelineError;

    async fn accept(&mut self, page: CandleBatch) -> Result<(), PipelineError> {
        // Validate before dedup so an invalid row never displaces a valid one
        let (valid, rejected) = page.partition_valid();
        let valid = valid.dedup_keep_first().sorted();
        if !rejected.is_empty() {
            debug!(series = %self.series, rejected = rejected.len(), "invalid rows filtered");
            self.rejected.extend(rejected);
        }

        let Some(last) = valid.last_timestamp() else {
            return Ok(());
        };

        let rows = self.store.insert(&valid, InsertMode::Replace).await?;
        self.inserted += rows;
        self.persisted += valid.len() as u64;

        self.checkpoints.save(self.series, last, self.persisted)?;
        self.checkpointed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{InjectedFailure, StubConnector};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;
    use trading_common::data::Candle;
    use trading_common::error::ErrorClassification;

    fn end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap()
    }

    fn hourly(from: i64, to: i64) -> Vec<Candle> {
        (from..to)
            .map(|h| {
                Candle::new(
                    "binance",
                    "BTC/USDT",
                    Timeframe::OneHour,
                    end() - Duration::days(2) + Duration::hours(h),
                    dec!(100),
                    dec!(110),
                    dec!(95),
                    dec!(105),
                    dec!(2),
                )
            })
            .collect()
    }

    async fn pipeline(dir: &tempfile::TempDir) -> BackfillPipeline {
        let settings = Settings::rooted_at(dir.path());
        let store = Arc::new(TimeSeriesStore::open(&settings.storage).await.unwrap());
        store.init_schema().await.unwrap();
        let mut pipeline = BackfillPipeline::from_settings(store, &settings);
        pipeline.policy =
            RetryPolicy::new(1, StdDuration::from_millis(1)).with_max_delay(StdDuration::from_millis(1));
        pipeline
    }

    fn request() -> BackfillRequest {
        BackfillRequest::new(Exchange::Binance, "BTC/USDT", Timeframe::OneHour, 2).ending_at(end())
    }

    #[tokio::test]
    async fn test_completed_backfill_removes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let stub = Arc::new(StubConnector::with_history("binance", hourly(0, 48)).max_page_size(10));

        let report = pipeline.run(stub, &request(), None).await.unwrap();
        assert!(report.completed());
        assert_eq!(report.inserted, 48);
        assert_eq!(report.pages, 5);
        assert_eq!(report.archived_files.len(), 1);
        assert!(!report.integrity.unwrap().has_issues());
        assert_eq!(
            pipeline.checkpoints().load(&report.series).unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_unsupported_timeframe_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let stub = Arc::new(
            StubConnector::with_history("binance", hourly(0, 4)).timeframes(vec![Timeframe::OneDay]),
        );

        let err = pipeline.run(stub.clone(), &request(), None).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_writes_checkpoint_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let stub = Arc::new(
            StubConnector::with_history("binance", hourly(0, 48))
                .fail_next([InjectedFailure::InvalidArgument]),
        );
        let mut request = request();
        request.export_to_archive = false;

        let err = pipeline.run(stub, &request, None).await.unwrap_err();
        assert!(err.is_configuration());

        let series = SeriesKey::new("binance", "BTC/USDT", Timeframe::OneHour);
        let checkpoint = pipeline.checkpoints().load(&series).unwrap().unwrap();
        assert_eq!(checkpoint.last_timestamp, end() - Duration::days(2));
        assert_eq!(checkpoint.record_count, 0);
    }

    #[tokio::test]
    async fn test_skipped_page_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let stub = Arc::new(
            StubConnector::with_history("binance", hourly(0, 48))
                .max_page_size(24)
                .fail_at(end() - Duration::days(2)),
        );
        let mut request = request();
        request.export_to_archive = false;

        let report = pipeline.run(stub, &request, None).await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.inserted, 24);
    }
}

//! Backfill pipeline tests
//!
//! Runs the full fetch → validate → store → archive → checkpoint flow against
//! the scripted connector with every path under a temp directory.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use data_manager::backfill::{BackfillPipeline, BackfillRequest};
use data_manager::config::Settings;
use data_manager::provider::mock::StubConnector;
use data_manager::provider::Exchange;
use data_manager::storage::TimeSeriesStore;
use trading_common::data::{Candle, SeriesKey, Timeframe};
use trading_common::error::ErrorClassification;

fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
}

fn hour(h: i64) -> DateTime<Utc> {
    end() - Duration::days(2) + Duration::hours(h)
}

fn candle(ts: DateTime<Utc>, high: Decimal, close: Decimal) -> Candle {
    Candle::new(
        "binance",
        "BTC/USDT",
        Timeframe::OneHour,
        ts,
        dec!(42000),
        high,
        dec!(41800),
        close,
        dec!(12.5),
    )
}

fn valid_history() -> Vec<Candle> {
    (0..48)
        .map(|h| candle(hour(h), dec!(42100), dec!(42050) + Decimal::from(h)))
        .collect()
}

async fn setup(dir: &tempfile::TempDir) -> (Settings, Arc<TimeSeriesStore>, BackfillPipeline) {
    let mut settings = Settings::rooted_at(dir.path());
    settings.fetch.base_delay_secs = 0.001;
    let store = Arc::new(TimeSeriesStore::open(&settings.storage).await.unwrap());
    store.init_schema().await.unwrap();
    let pipeline = BackfillPipeline::from_settings(store.clone(), &settings);
    (settings, store, pipeline)
}

fn request() -> BackfillRequest {
    BackfillRequest::new(Exchange::Binance, "BTC/USDT", Timeframe::OneHour, 2).ending_at(end())
}

fn series() -> SeriesKey {
    SeriesKey::new("binance", "BTC/USDT", Timeframe::OneHour)
}

/// 48 valid candles, 3 duplicate timestamps and 2 OHLC-invalid rows end up as
/// exactly 48 clean rows and one dead-letter entry holding the invalid pair
#[tokio::test]
async fn test_end_to_end_binance_two_days() {
    let dir = tempfile::tempdir().unwrap();
    let (settings, store, pipeline) = setup(&dir).await;

    let mut history = Vec::new();
    for (h, c) in valid_history().into_iter().enumerate() {
        history.push(c);
        if [5, 17, 40].contains(&h) {
            // Same key, different close: the first occurrence wins
            history.push(candle(hour(h as i64), dec!(42100), dec!(42001)));
        }
        if [10, 30].contains(&h) {
            // High below open, off the hourly grid
            history.push(candle(hour(h as i64) + Duration::minutes(30), dec!(41900), dec!(41850)));
        }
    }
    assert_eq!(history.len(), 53);

    let stub = Arc::new(StubConnector::with_history("binance", history));
    let report = pipeline.run(stub, &request(), None).await.unwrap();

    assert!(report.completed());
    assert_eq!(report.rejected, 2);
    assert_eq!(report.inserted, 48);

    let rows = store
        .query("BTC/USDT", Timeframe::OneHour, "binance", None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 48);
    for (h, row) in rows.iter().enumerate() {
        assert_eq!(row.close, dec!(42050) + Decimal::from(h as i64));
    }

    let integrity = store
        .validate_integrity("BTC/USDT", Timeframe::OneHour, "binance")
        .await
        .unwrap();
    assert_eq!(integrity.invalid_ohlc_count, 0);
    assert_eq!(integrity.duplicate_count, 0);
    assert_eq!(integrity.gap_count, 0);
    assert_eq!(integrity.total_records, 48);

    let dead_letters = data_manager::checkpoint::DeadLetterStore::new(&settings.storage.dead_letter_dir);
    let entries = dead_letters.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(dead_letters.read(&entries[0]).unwrap().count, 2);

    assert_eq!(report.archived_files.len(), 1);
    assert_eq!(pipeline.checkpoints().load(&series()).unwrap(), None);
}

/// An invalid row sharing a key with a valid one neither displaces it nor
/// disappears: both orders keep the valid candle and dead-letter the bad one
#[tokio::test]
async fn test_invalid_row_colliding_with_valid_key() {
    let dir = tempfile::tempdir().unwrap();
    let (settings, store, pipeline) = setup(&dir).await;

    let mut history = Vec::new();
    for (h, c) in valid_history().into_iter().enumerate() {
        let bad = candle(hour(h as i64), dec!(41900), dec!(41850));
        match h {
            10 => history.extend([bad, c]),
            20 => history.extend([c, bad]),
            _ => history.push(c),
        }
    }

    let stub = Arc::new(StubConnector::with_history("binance", history));
    let report = pipeline.run(stub, &request(), None).await.unwrap();
    assert_eq!(report.rejected, 2);
    assert_eq!(report.inserted, 48);

    let rows = store
        .query("BTC/USDT", Timeframe::OneHour, "binance", None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 48);
    assert_eq!(rows.as_slice()[10].close, dec!(42060));
    assert_eq!(rows.as_slice()[20].close, dec!(42070));

    let gaps = store
        .validate_integrity("BTC/USDT", Timeframe::OneHour, "binance")
        .await
        .unwrap();
    assert_eq!(gaps.gap_count, 0);

    let dead_letters = data_manager::checkpoint::DeadLetterStore::new(&settings.storage.dead_letter_dir);
    let entries = dead_letters.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(dead_letters.read(&entries[0]).unwrap().count, 2);
}

/// An interrupted backfill resumes from its checkpoint and ends with the same
/// store content as an uninterrupted one
#[tokio::test]
async fn test_interrupted_backfill_resumes_from_checkpoint() {
    let clean_dir = tempfile::tempdir().unwrap();
    let (_, clean_store, clean_pipeline) = setup(&clean_dir).await;
    let stub = Arc::new(StubConnector::with_history("binance", valid_history()).max_page_size(10));
    clean_pipeline.run(stub, &request(), None).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let (_, store, pipeline) = setup(&dir).await;
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let interrupting = Arc::new(
        StubConnector::with_history("binance", valid_history())
            .max_page_size(10)
            .interrupt_after(2, shutdown_tx.clone()),
    );

    let first = pipeline
        .run(interrupting, &request(), Some(&mut shutdown_rx))
        .await
        .unwrap();
    assert!(first.cancelled);
    assert_eq!(first.inserted, 20);

    let checkpoint = pipeline.checkpoints().load(&series()).unwrap().unwrap();
    let resume_point = hour(19);
    assert_eq!(checkpoint.last_timestamp, resume_point);
    assert_eq!(checkpoint.record_count, 20);

    let resuming = Arc::new(StubConnector::with_history("binance", valid_history()).max_page_size(10));
    let mut resume = request();
    resume.resume = true;
    let second = pipeline.run(resuming.clone(), &resume, None).await.unwrap();

    assert!(second.completed());
    assert_eq!(second.effective_start, resume_point);
    assert_eq!(resuming.calls()[0].since, Some(resume_point));
    assert_eq!(pipeline.checkpoints().load(&series()).unwrap(), None);

    let resumed_rows = store
        .query("BTC/USDT", Timeframe::OneHour, "binance", None, None)
        .await
        .unwrap();
    let clean_rows = clean_store
        .query("BTC/USDT", Timeframe::OneHour, "binance", None, None)
        .await
        .unwrap();
    assert_eq!(resumed_rows, clean_rows);
    assert_eq!(resumed_rows.len(), 48);
}

/// Running the same backfill twice leaves the store unchanged
#[tokio::test]
async fn test_repeated_backfill_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (_, store, pipeline) = setup(&dir).await;

    for _ in 0..2 {
        let stub = Arc::new(StubConnector::with_history("binance", valid_history()).max_page_size(16));
        let mut request = request();
        request.export_to_archive = false;
        pipeline.run(stub, &request, None).await.unwrap();
    }

    let metadata = store.metadata(&series()).await.unwrap().unwrap();
    assert_eq!(metadata.total_count, 48);
    let coverage = store.coverage().await.unwrap();
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].first_timestamp, hour(0));
    assert_eq!(coverage[0].last_timestamp, hour(47));
}

/// Unknown pairs are rejected before any request is made
#[tokio::test]
async fn test_malformed_symbol_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, pipeline) = setup(&dir).await;
    let stub = Arc::new(StubConnector::with_history("binance", valid_history()));

    let mut request = request();
    request.symbol = "BTC/".into();
    let err = pipeline.run(stub.clone(), &request, None).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(stub.calls().is_empty());
}

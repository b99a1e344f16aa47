use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use trading_common::data::{Candle, CandleBatch, SeriesKey};
use trading_common::retry::RetryPolicy;

use super::buffer::{LiveBuffer, PendingBatch};
use crate::archive::ColumnarArchive;
use crate::checkpoint::DeadLetterStore;
use crate::storage::{InsertMode, TimeSeriesStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub batches_flushed: u64,
    pub candles_inserted: u64,
    pub retry_attempts: u64,
    pub batches_dead_lettered: u64,
    pub candles_rejected: u64,
}

#[derive(Debug)]
struct Held {
    batch: PendingBatch,
    failures: u32,
    not_before: Instant,
}

/// Persists drained buffer batches.
///
/// A batch that fails to insert stays in memory under its sequence number and
/// is retried on later flushes once its backoff has elapsed. When the policy
/// is exhausted it is dead-lettered and dropped.
pub struct Flusher {
    store: Arc<TimeSeriesStore>,
    archive: Option<ColumnarArchive>,
    dead_letters: DeadLetterStore,
    policy: RetryPolicy,
    held: BTreeMap<u64, Held>,
    stats: FlushStats,
}

impl Flusher {
    pub fn new(store: Arc<TimeSeriesStore>, dead_letters: DeadLetterStore, policy: RetryPolicy) -> Self {
        Self {
            store,
            archive: None,
            dead_letters,
            policy,
            held: BTreeMap::new(),
            stats: FlushStats::default(),
        }
    }

    /// Mirror every persisted batch into the archive
    pub fn with_archive(mut self, archive: ColumnarArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// Batches held for retry
    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub fn failures(&self, seq: u64) -> Option<u32> {
        self.held.get(&seq).map(|h| h.failures)
    }

    /// Drain the buffer and persist it, together with any retry that is due.
    pub async fn flush(&mut self, buffer: &LiveBuffer) {
        if let Some(batch) = buffer.drain() {
            self.admit(batch).await;
        }
        self.persist_due().await;
    }

    /// Final flush on shutdown. Waits out backoffs until every held batch is
    /// either persisted or dead-lettered.
    pub async fn flush_final(&mut self, buffer: &LiveBuffer) {
        self.flush(buffer).await;
        while let Some(next) = self.held.values().map(|h| h.not_before).min() {
            sleep_until(next).await;
            self.persist_due().await;
        }
        info!(
            batches = self.stats.batches_flushed,
            candles = self.stats.candles_inserted,
            dead_lettered = self.stats.batches_dead_lettered,
            "final flush complete"
        );
    }

    async fn admit(&mut self, batch: PendingBatch) {
        let (valid, rejected) = batch.candles.partition_valid();
        let valid = valid.dedup_keep_last().sorted();
        if !rejected.is_empty() {
            self.stats.candles_rejected += rejected.len() as u64;
            self.dead_letters
                .deadletter_blocking(rejected, "OHLC validation failed in live stream".to_string())
                .await;
        }
        if valid.is_empty() {
            return;
        }
        debug!(seq = batch.seq, candles = valid.len(), "batch queued for flush");
        self.held.insert(
            batch.seq,
            Held {
                batch: PendingBatch {
                    seq: batch.seq,
                    candles: valid,
                },
                failures: 0,
                not_before: Instant::now(),
            },
        );
    }

    async fn persist_due(&mut self) {
        let now = Instant::now();
        let due: Vec<u64> = self
            .held
            .iter()
            .filter(|(_, h)| h.not_before <= now)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in due {
            let Some(candles) = self.held.get(&seq).map(|h| h.batch.candles.clone()) else {
                continue;
            };

            match self.store.insert(&candles, InsertMode::Replace).await {
                Ok(inserted) => {
                    self.held.remove(&seq);
                    self.stats.batches_flushed += 1;
                    self.stats.candles_inserted += inserted;
                    info!(seq, candles = candles.len(), inserted, "flushed live batch");
                    self.mirror(candles).await;
                }
                Err(e) => self.record_failure(seq, &e.to_string()).await,
            }
        }
    }

    async fn record_failure(&mut self, seq: u64, reason: &str) {
        let Some(held) = self.held.get_mut(&seq) else {
            return;
        };
        held.failures += 1;

        if self.policy.allows(held.failures) {
            let delay = self.policy.delay_for(held.failures);
            held.not_before = Instant::now() + delay;
            self.stats.retry_attempts += 1;
            warn!(
                seq,
                failures = held.failures,
                retry_in_ms = delay.as_millis() as u64,
                error = reason,
                "live flush failed, batch held for retry"
            );
            return;
        }

        let failures = held.failures;
        if let Some(held) = self.held.remove(&seq) {
            error!(seq, failures, error = reason, "live flush retries exhausted");
            self.stats.batches_dead_lettered += 1;
            self.dead_letters
                .deadletter_blocking(
                    held.batch.candles.to_vec(),
                    format!("flush failed after {} attempts: {}", failures, reason),
                )
                .await;
        }
    }

    /// Parquet encoding runs on the blocking pool, off the flush task's worker.
    async fn mirror(&self, candles: CandleBatch) {
        let Some(archive) = self.archive.clone() else {
            return;
        };
        let task = tokio::task::spawn_blocking(move || {
            let mut by_series: HashMap<SeriesKey, Vec<Candle>> = HashMap::new();
            for candle in candles.iter() {
                by_series.entry(candle.series()).or_default().push(candle.clone());
            }
            for (series, rows) in by_series {
                let rows = CandleBatch::new(rows);
                if let Err(e) =
                    archive.write_partition(&rows, &series.exchange, &series.symbol, series.timeframe)
                {
                    // The store already has these rows; the archive catches up on the next export
                    warn!(%series, error = %e, "failed to mirror live batch to archive");
                }
            }
        });
        if let Err(e) = task.await {
            warn!(error = %e, "archive mirror task did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use trading_common::data::Timeframe;

    fn candle(minute: u32, high: rust_decimal::Decimal) -> Candle {
        Candle::new(
            "binance",
            "BTC/USDT",
            Timeframe::OneMinute,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            dec!(100),
            high,
            dec!(99),
            dec!(100),
            dec!(1),
        )
    }

    async fn setup(dir: &tempfile::TempDir) -> (Arc<TimeSeriesStore>, DeadLetterStore) {
        let store = TimeSeriesStore::open_path(dir.path().join("live.db")).await.unwrap();
        store.init_schema().await.unwrap();
        (Arc::new(store), DeadLetterStore::new(dir.path().join("dead_letter")))
    }

    async fn break_store(store: &TimeSeriesStore) {
        sqlx::query("DROP TABLE ohlcv").execute(store.pool()).await.unwrap();
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_flush_persists_and_dead_letters_invalid_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dead_letters) = setup(&dir).await;
        let mut flusher = Flusher::new(store.clone(), dead_letters.clone(), quick_policy());

        let buffer = LiveBuffer::new(100);
        buffer.push(candle(0, dec!(101)));
        buffer.push(candle(1, dec!(101)));
        buffer.push(candle(2, dec!(50)));
        flusher.flush(&buffer).await;

        let rows = store
            .query("BTC/USDT", Timeframe::OneMinute, "binance", None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(flusher.stats().candles_rejected, 1);
        assert_eq!(dead_letters.list().unwrap().len(), 1);
        assert_eq!(flusher.held(), 0);
    }

    #[tokio::test]
    async fn test_invalid_update_does_not_replace_valid_candle() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dead_letters) = setup(&dir).await;
        let mut flusher = Flusher::new(store.clone(), dead_letters.clone(), quick_policy());

        let buffer = LiveBuffer::new(100);
        buffer.push(candle(0, dec!(101)));
        buffer.push(candle(0, dec!(50)));
        buffer.push(candle(1, dec!(50)));
        buffer.push(candle(1, dec!(102)));
        flusher.flush(&buffer).await;

        let rows = store
            .query("BTC/USDT", Timeframe::OneMinute, "binance", None, None)
            .await
            .unwrap();
        let highs: Vec<_> = rows.iter().map(|c| c.high).collect();
        assert_eq!(highs, vec![dec!(101), dec!(102)]);
        assert_eq!(flusher.stats().candles_rejected, 2);

        let files = dead_letters.list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(dead_letters.read(&files[0]).unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_held_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dead_letters) = setup(&dir).await;
        let mut flusher = Flusher::new(store.clone(), dead_letters.clone(), quick_policy());
        let buffer = LiveBuffer::new(100);

        break_store(&store).await;
        buffer.push(candle(0, dec!(101)));
        flusher.flush(&buffer).await;
        assert_eq!(flusher.held(), 1);
        let seq = *flusher.held.keys().next().unwrap();
        assert_eq!(flusher.failures(seq), Some(1));

        // New candles form their own batch while the first one waits
        buffer.push(candle(1, dec!(101)));
        store.init_schema().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        flusher.flush(&buffer).await;

        assert_eq!(flusher.held(), 0);
        assert_eq!(flusher.stats().batches_flushed, 2);
        assert_eq!(flusher.stats().retry_attempts, 1);
        assert!(dead_letters.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_batch_is_dead_lettered() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dead_letters) = setup(&dir).await;
        let mut flusher = Flusher::new(store.clone(), dead_letters.clone(), quick_policy());
        let buffer = LiveBuffer::new(100);

        break_store(&store).await;
        buffer.push(candle(0, dec!(101)));
        buffer.push(candle(1, dec!(101)));
        flusher.flush_final(&buffer).await;

        assert_eq!(flusher.held(), 0);
        assert_eq!(flusher.stats().retry_attempts, 2);
        assert_eq!(flusher.stats().batches_dead_lettered, 1);

        let files = dead_letters.list().unwrap();
        assert_eq!(files.len(), 1);
        let entry = dead_letters.read(&files[0]).unwrap();
        assert_eq!(entry.count, 2);
        assert!(entry.reason.starts_with("flush failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_archive_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dead_letters) = setup(&dir).await;
        let archive = ColumnarArchive::new(dir.path().join("lake"));
        let mut flusher =
            Flusher::new(store, dead_letters, quick_policy()).with_archive(archive.clone());

        let buffer = LiveBuffer::new(100);
        buffer.push(candle(0, dec!(101)));
        buffer.push(candle(1, dec!(101)));
        flusher.flush(&buffer).await;

        let archived = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneMinute, Some((2024, 1)))
            .unwrap();
        assert_eq!(archived.len(), 2);
    }
}

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info};

use trading_common::data::{
    millis_to_utc, Candle, CandleBatch, Gap, GapDetector, SeriesKey, Timeframe,
};

use super::schema::STATEMENTS;
use super::{
    CoverageRow, InsertMode, IntegritySummary, SeriesMetadata, StoreError, StoreResult,
};
use crate::config::StorageSettings;

const CANDLE_COLUMNS: &str = "exchange, symbol, timeframe, timestamp, open, high, low, close, \
     volume, quote_volume, trades_count, taker_buy_volume, taker_buy_quote_volume";

/// Durable candle store.
///
/// Writers are serialized through a per-instance lock so one batch's
/// transaction never interleaves with another's; readers go straight to the
/// pool.
pub struct TimeSeriesStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl TimeSeriesStore {
    /// Open (creating if needed) the database described by `settings`.
    pub async fn open(settings: &StorageSettings) -> StoreResult<Self> {
        if let Some(parent) = settings.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&settings.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(settings.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect_with(options)
            .await?;

        debug!(path = %settings.database_path.display(), "opened time-series store");
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Open with default settings at `path`.
    pub async fn open_path(path: impl AsRef<Path>) -> StoreResult<Self> {
        let settings = StorageSettings {
            database_path: path.as_ref().to_path_buf(),
            ..Default::default()
        };
        Self::open(&settings).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables, indexes and views. Idempotent.
    pub async fn init_schema(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for statement in STATEMENTS {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("time-series schema initialized");
        Ok(())
    }

    /// Names of the tables and views present in the database
    pub async fn schema_objects(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    /// Insert a batch in one transaction.
    ///
    /// Every row is validated first; a single invalid row rejects the whole
    /// batch. Rows sharing a key are collapsed per `mode` before writing, and
    /// `ohlcv_metadata` for the touched series is refreshed in the same
    /// transaction. Returns the number of rows written.
    pub async fn insert(&self, batch: &CandleBatch, mode: InsertMode) -> StoreResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        if let Some((index, violation)) = batch.first_violation() {
            return Err(StoreError::InvalidCandle {
                index,
                timestamp: batch.as_slice()[index].timestamp,
                violation,
            });
        }

        let deduped = match mode {
            InsertMode::Replace => batch.dedup_keep_last(),
            InsertMode::Ignore => batch.dedup_keep_first(),
        };
        let verb = match mode {
            InsertMode::Replace => "INSERT OR REPLACE",
            InsertMode::Ignore => "INSERT OR IGNORE",
        };
        let sql = format!(
            "{verb} INTO ohlcv ({CANDLE_COLUMNS}, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let series: BTreeSet<SeriesKey> = deduped.iter().map(Candle::series).collect();
        let now = Utc::now().timestamp_millis();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut written = 0u64;
        for candle in deduped.iter() {
            let result = sqlx::query(&sql)
                .bind(&candle.exchange)
                .bind(&candle.symbol)
                .bind(candle.timeframe.as_str())
                .bind(candle.timestamp_millis())
                .bind(candle.open.to_string())
                .bind(candle.high.to_string())
                .bind(candle.low.to_string())
                .bind(candle.close.to_string())
                .bind(candle.volume.to_string())
                .bind(candle.quote_volume.map(|d| d.to_string()))
                .bind(candle.trades_count.map(|n| n as i64))
                .bind(candle.taker_buy_volume.map(|d| d.to_string()))
                .bind(candle.taker_buy_quote_volume.map(|d| d.to_string()))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
        }

        for key in &series {
            sqlx::query(
                r#"
                INSERT INTO ohlcv_metadata
                    (exchange, symbol, timeframe, first_timestamp, last_timestamp, total_count, updated_at)
                SELECT exchange, symbol, timeframe, MIN(timestamp), MAX(timestamp), COUNT(*), ?
                FROM ohlcv
                WHERE exchange = ? AND symbol = ? AND timeframe = ?
                GROUP BY exchange, symbol, timeframe
                ON CONFLICT (exchange, symbol, timeframe) DO UPDATE SET
                    first_timestamp = excluded.first_timestamp,
                    last_timestamp = excluded.last_timestamp,
                    total_count = excluded.total_count,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(now)
            .bind(&key.exchange)
            .bind(&key.symbol)
            .bind(key.timeframe.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            rows = written,
            batch = batch.len(),
            series = series.len(),
            ?mode,
            "inserted candles"
        );
        Ok(written)
    }

    /// Candles for one series, ascending, optionally bounded (inclusive).
    pub async fn query(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        exchange: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<CandleBatch> {
        let sql = format!(
            "SELECT {CANDLE_COLUMNS} FROM ohlcv \
             WHERE exchange = ? AND symbol = ? AND timeframe = ? \
               AND (? IS NULL OR timestamp >= ?) \
               AND (? IS NULL OR timestamp <= ?) \
             ORDER BY timestamp"
        );
        let start = start.map(|t| t.timestamp_millis());
        let end = end.map(|t| t.timestamp_millis());

        let rows = sqlx::query(&sql)
            .bind(exchange)
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(start)
            .bind(start)
            .bind(end)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(candle_from_row).collect()
    }

    /// Every series present in the store
    pub async fn datasets(&self) -> StoreResult<Vec<SeriesKey>> {
        let rows = sqlx::query(
            "SELECT DISTINCT exchange, symbol, timeframe FROM ohlcv \
             ORDER BY exchange, symbol, timeframe",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<SeriesKey> {
                Ok(SeriesKey::new(
                    row.try_get::<String, _>("exchange")?,
                    row.try_get::<String, _>("symbol")?,
                    timeframe_column(row)?,
                ))
            })
            .collect()
    }

    /// First/last timestamp, count and days covered per series
    pub async fn coverage(&self) -> StoreResult<Vec<CoverageRow>> {
        let rows = sqlx::query(
            r#"
            SELECT exchange, symbol, timeframe,
                   MIN(timestamp) AS first_ts, MAX(timestamp) AS last_ts, COUNT(*) AS total
            FROM ohlcv
            GROUP BY exchange, symbol, timeframe
            ORDER BY exchange, symbol, timeframe
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<CoverageRow> {
                let first = millis_column(row, "first_ts")?;
                let last = millis_column(row, "last_ts")?;
                Ok(CoverageRow {
                    series: SeriesKey::new(
                        row.try_get::<String, _>("exchange")?,
                        row.try_get::<String, _>("symbol")?,
                        timeframe_column(row)?,
                    ),
                    first_timestamp: first,
                    last_timestamp: last,
                    total_candles: row.try_get::<i64, _>("total")? as u64,
                    days_covered: (last - first).num_days(),
                })
            })
            .collect()
    }

    pub async fn metadata(&self, series: &SeriesKey) -> StoreResult<Option<SeriesMetadata>> {
        let row = sqlx::query(
            "SELECT first_timestamp, last_timestamp, total_count, updated_at FROM ohlcv_metadata \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(&series.exchange)
        .bind(&series.symbol)
        .bind(series.timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StoreResult<SeriesMetadata> {
            Ok(SeriesMetadata {
                series: series.clone(),
                first_timestamp: millis_column(&row, "first_timestamp")?,
                last_timestamp: millis_column(&row, "last_timestamp")?,
                total_count: row.try_get::<i64, _>("total_count")? as u64,
                updated_at: millis_column(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    /// Most recent candle of a series, via the `latest_candles` view
    pub async fn latest(&self, series: &SeriesKey) -> StoreResult<Option<Candle>> {
        let sql = format!(
            "SELECT {CANDLE_COLUMNS} FROM latest_candles \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?"
        );
        let row = sqlx::query(&sql)
            .bind(&series.exchange)
            .bind(&series.symbol)
            .bind(series.timeframe.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(candle_from_row).transpose()
    }

    async fn timestamps(&self, series: &SeriesKey) -> StoreResult<Vec<DateTime<Utc>>> {
        let rows = sqlx::query(
            "SELECT timestamp FROM ohlcv WHERE exchange = ? AND symbol = ? AND timeframe = ? \
             ORDER BY timestamp",
        )
        .bind(&series.exchange)
        .bind(&series.symbol)
        .bind(series.timeframe.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| millis_column(r, "timestamp")).collect()
    }

    /// Consecutive candles further apart than 1.5 intervals
    pub async fn detect_gaps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        exchange: &str,
    ) -> StoreResult<Vec<Gap>> {
        let series = SeriesKey::new(exchange, symbol, timeframe);
        let timestamps = self.timestamps(&series).await?;
        let gaps = GapDetector::new(timeframe).detect(&timestamps);
        debug!(series = %series, gaps = gaps.len(), "gap scan");
        Ok(gaps)
    }

    /// Count invariant violations, duplicate keys and gaps for one series.
    pub async fn validate_integrity(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        exchange: &str,
    ) -> StoreResult<IntegritySummary> {
        let series = SeriesKey::new(exchange, symbol, timeframe);
        let candles = self.query(symbol, timeframe, exchange, None, None).await?;

        let invalid_ohlc_count = candles.iter().filter(|c| !c.is_valid()).count() as u64;

        // Zero unless the primary key is not being enforced
        let duplicate_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) - COUNT(DISTINCT timestamp) FROM ohlcv \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_one(&self.pool)
        .await?;

        let timestamps: Vec<DateTime<Utc>> = candles.iter().map(|c| c.timestamp).collect();
        let gaps = GapDetector::new(timeframe).detect(&timestamps);

        Ok(IntegritySummary {
            series,
            total_records: candles.len() as u64,
            first_timestamp: candles.first_timestamp(),
            last_timestamp: candles.last_timestamp(),
            invalid_ohlc_count,
            duplicate_count: duplicate_count.max(0) as u64,
            gap_count: gaps.len() as u64,
            missing_candles: GapDetector::total_missing(&gaps),
            validated_at: Utc::now(),
        })
    }

    /// Persist a validation summary into `data_quality_metadata`.
    pub async fn record_validation(&self, summary: &IntegritySummary) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO data_quality_metadata
                (exchange, symbol, timeframe, first_timestamp, last_timestamp, total_records,
                 gaps_detected, duplicates_detected, anomalies_detected, last_validation)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (exchange, symbol, timeframe) DO UPDATE SET
                first_timestamp = excluded.first_timestamp,
                last_timestamp = excluded.last_timestamp,
                total_records = excluded.total_records,
                gaps_detected = excluded.gaps_detected,
                duplicates_detected = excluded.duplicates_detected,
                anomalies_detected = excluded.anomalies_detected,
                last_validation = excluded.last_validation
            "#,
        )
        .bind(&summary.series.exchange)
        .bind(&summary.series.symbol)
        .bind(summary.series.timeframe.as_str())
        .bind(summary.first_timestamp.map(|t| t.timestamp_millis()))
        .bind(summary.last_timestamp.map(|t| t.timestamp_millis()))
        .bind(summary.total_records as i64)
        .bind(summary.gap_count as i64)
        .bind(summary.duplicate_count as i64)
        .bind(summary.invalid_ohlc_count as i64)
        .bind(summary.validated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis_column(row: &SqliteRow, column: &str) -> StoreResult<DateTime<Utc>> {
    let ms: i64 = row.try_get(column)?;
    millis_to_utc(ms).map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}

fn timeframe_column(row: &SqliteRow) -> StoreResult<Timeframe> {
    let raw: String = row.try_get("timeframe")?;
    Timeframe::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decimal_column(row: &SqliteRow, column: &str) -> StoreResult<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| StoreError::Corrupt(format!("{} '{}': {}", column, raw, e)))
}

fn optional_decimal_column(row: &SqliteRow, column: &str) -> StoreResult<Option<Decimal>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| StoreError::Corrupt(format!("{} '{}': {}", column, s, e)))
    })
    .transpose()
}

fn candle_from_row(row: &SqliteRow) -> StoreResult<Candle> {
    let mut candle = Candle::new(
        row.try_get::<String, _>("exchange")?,
        row.try_get::<String, _>("symbol")?,
        timeframe_column(row)?,
        millis_column(row, "timestamp")?,
        decimal_column(row, "open")?,
        decimal_column(row, "high")?,
        decimal_column(row, "low")?,
        decimal_column(row, "close")?,
        decimal_column(row, "volume")?,
    );
    candle.quote_volume = optional_decimal_column(row, "quote_volume")?;
    candle.trades_count = row
        .try_get::<Option<i64>, _>("trades_count")?
        .map(|n| n.max(0) as u64);
    candle.taker_buy_volume = optional_decimal_column(row, "taker_buy_volume")?;
    candle.taker_buy_quote_volume = optional_decimal_column(row, "taker_buy_quote_volume")?;
    Ok(candle)
}

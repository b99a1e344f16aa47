//! Columnar archive
//!
//! Parquet files partitioned by exchange, symbol, timeframe and calendar
//! month:
//!
//! ```text
//! {root}/{exchange}/{BASE_QUOTE}/{timeframe}/year=YYYY/month=MM/data.parquet
//!                                                            /part-{seq:06}.parquet
//! ```
//!
//! Every file is written to a dot-prefixed temp sibling and renamed into
//! place, so readers only ever see complete files. Within a month, later
//! files supersede earlier ones per timestamp until `compact` folds them into
//! a single `data.parquet`.

pub mod codec;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use trading_common::data::{symbol_slug, Candle, CandleBatch, SeriesKey, Timeframe};
use trading_common::error::{ErrorCategory, ErrorClassification};

const DATA_FILE: &str = "data.parquet";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Schema error: {0}")]
    Schema(String),

    /// Batch rows do not belong to the partition being written
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
}

impl ErrorClassification for ArchiveError {
    fn category(&self) -> ErrorCategory {
        match self {
            ArchiveError::Io(_) => ErrorCategory::Transient,
            ArchiveError::Arrow(_) | ArchiveError::Parquet(_) | ArchiveError::Schema(_) => {
                ErrorCategory::Permanent
            }
            ArchiveError::InvalidBatch(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ArchiveError::Io(_) => Some(Duration::from_millis(200)),
            _ => None,
        }
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Per-dataset file statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub series: SeriesKey,
    pub partitions: usize,
    pub files: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompactionReport {
    pub partitions_compacted: usize,
    pub files_before: usize,
    pub files_after: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

#[derive(Debug, Clone)]
pub struct ColumnarArchive {
    root: PathBuf,
}

impl ColumnarArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every month of one dataset
    pub fn dataset_dir(&self, exchange: &str, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.root
            .join(exchange)
            .join(symbol_slug(symbol))
            .join(timeframe.as_str())
    }

    pub fn partition_dir(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        year: i32,
        month: u32,
    ) -> PathBuf {
        self.dataset_dir(exchange, symbol, timeframe)
            .join(format!("year={:04}", year))
            .join(format!("month={:02}", month))
    }

    /// Write `batch` into its monthly partitions. Returns the files created.
    ///
    /// Every row must belong to `(exchange, symbol, timeframe)`.
    pub fn write_partition(
        &self,
        batch: &CandleBatch,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> ArchiveResult<Vec<PathBuf>> {
        if let Some(stray) = batch
            .iter()
            .find(|c| c.exchange != exchange || c.symbol != symbol || c.timeframe != timeframe)
        {
            return Err(ArchiveError::InvalidBatch(format!(
                "row {} {} {} does not belong to {} {} {}",
                stray.exchange, stray.symbol, stray.timeframe, exchange, symbol, timeframe
            )));
        }

        let mut written = Vec::new();
        for (year, month, rows) in batch.dedup_keep_last().split_by_month() {
            let dir = self.partition_dir(exchange, symbol, timeframe, year, month);
            fs::create_dir_all(&dir)?;

            let name = if dir.join(DATA_FILE).exists() {
                format!("part-{:06}.parquet", next_part_seq(&dir)?)
            } else {
                DATA_FILE.to_string()
            };

            let path = dir.join(&name);
            write_file_atomic(&path, rows.sorted().as_slice())?;
            debug!(path = %path.display(), rows = rows.len(), "wrote archive file");
            written.push(path);
        }
        Ok(written)
    }

    /// Read one month, or every month when `year_month` is `None`.
    ///
    /// A missing dataset or partition yields an empty batch.
    pub fn read_partition(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        year_month: Option<(i32, u32)>,
    ) -> ArchiveResult<CandleBatch> {
        let months = match year_month {
            Some((year, month)) => vec![self.partition_dir(exchange, symbol, timeframe, year, month)],
            None => month_dirs(&self.dataset_dir(exchange, symbol, timeframe))?,
        };

        let mut candles = Vec::new();
        for dir in months {
            candles.extend(read_month(&dir)?.iter().cloned());
        }
        Ok(CandleBatch::new(candles).sorted())
    }

    /// Fold every month with more than one file into a single `data.parquet`.
    pub fn compact(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> ArchiveResult<CompactionReport> {
        let mut report = CompactionReport::default();

        for dir in month_dirs(&self.dataset_dir(exchange, symbol, timeframe))? {
            let files = parquet_files(&dir)?;
            let bytes = total_size(&files)?;
            report.files_before += files.len();
            report.bytes_before += bytes;

            if files.len() <= 1 {
                report.files_after += files.len();
                report.bytes_after += bytes;
                continue;
            }

            let merged = read_month(&dir)?;
            let target = dir.join(DATA_FILE);
            write_file_atomic(&target, merged.as_slice())?;
            for file in files.iter().filter(|f| **f != target) {
                fs::remove_file(file)?;
            }

            report.partitions_compacted += 1;
            report.files_after += 1;
            report.bytes_after += fs::metadata(&target)?.len();
            debug!(dir = %dir.display(), merged = files.len(), rows = merged.len(), "compacted partition");
        }

        info!(
            exchange,
            symbol,
            timeframe = %timeframe,
            partitions = report.partitions_compacted,
            files_before = report.files_before,
            files_after = report.files_after,
            "compaction finished"
        );
        Ok(report)
    }

    /// Compact every dataset holding more than one file. Single-file datasets
    /// are left alone.
    pub fn compact_all(&self) -> ArchiveResult<Vec<(SeriesKey, CompactionReport)>> {
        let mut reports = Vec::new();
        for stats in self.storage_stats()? {
            if stats.files <= 1 {
                debug!(series = %stats.series, "skipping dataset with a single file");
                continue;
            }
            let s = &stats.series;
            let report = self.compact(&s.exchange, &s.symbol, s.timeframe)?;
            reports.push((stats.series, report));
        }
        Ok(reports)
    }

    /// File count, partition count and size of every dataset under the root
    pub fn storage_stats(&self) -> ArchiveResult<Vec<DatasetStats>> {
        let mut stats = Vec::new();
        for exchange_dir in sub_dirs(&self.root)? {
            let exchange = dir_name(&exchange_dir);
            for symbol_dir in sub_dirs(&exchange_dir)? {
                let symbol = dir_name(&symbol_dir).replace('_', "/");
                for timeframe_dir in sub_dirs(&symbol_dir)? {
                    let Ok(timeframe) = dir_name(&timeframe_dir).parse::<Timeframe>() else {
                        warn!(dir = %timeframe_dir.display(), "skipping unknown timeframe directory");
                        continue;
                    };

                    let mut entry = DatasetStats {
                        series: SeriesKey::new(exchange.clone(), symbol.clone(), timeframe),
                        partitions: 0,
                        files: 0,
                        total_bytes: 0,
                    };
                    for month in month_dirs(&timeframe_dir)? {
                        let files = parquet_files(&month)?;
                        entry.partitions += 1;
                        entry.files += files.len();
                        entry.total_bytes += total_size(&files)?;
                    }
                    stats.push(entry);
                }
            }
        }
        Ok(stats)
    }
}

fn write_file_atomic(path: &Path, candles: &[Candle]) -> ArchiveResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::InvalidBatch(format!("bad file name: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let result = (|| -> ArchiveResult<()> {
        let record_batch = codec::encode(candles)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(File::create(&tmp)?, codec::schema(), Some(props))?;
        writer.write(&record_batch)?;
        writer.into_inner()?.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_file(path: &Path) -> ArchiveResult<Vec<Candle>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut candles = Vec::new();
    for batch in reader {
        candles.extend(codec::decode(&batch?)?);
    }
    Ok(candles)
}

/// Merge every file of one month, later files winning per timestamp.
fn read_month(dir: &Path) -> ArchiveResult<CandleBatch> {
    let mut candles = Vec::new();
    for file in parquet_files(dir)? {
        candles.extend(read_file(&file)?);
    }
    Ok(CandleBatch::new(candles).dedup_keep_last().sorted())
}

/// Visible parquet files of a month: `data.parquet` first, then parts in
/// write order. Temp files are skipped.
fn parquet_files(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            let name = dir_name(p);
            !name.starts_with('.') && name.ends_with(".parquet")
        })
        .collect();
    files.sort_by_key(|p| (dir_name(p) != DATA_FILE, dir_name(p)));
    Ok(files)
}

/// One past the highest part sequence in the month, so name order is write order
fn next_part_seq(dir: &Path) -> ArchiveResult<u64> {
    let highest = parquet_files(dir)?
        .iter()
        .filter_map(|p| part_seq(&dir_name(p)))
        .max();
    Ok(highest.map_or(1, |seq| seq + 1))
}

fn part_seq(name: &str) -> Option<u64> {
    name.strip_prefix("part-")?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

fn month_dirs(dataset: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut months = Vec::new();
    for year in sub_dirs(dataset)?
        .into_iter()
        .filter(|d| dir_name(d).starts_with("year="))
    {
        months.extend(
            sub_dirs(&year)?
                .into_iter()
                .filter(|d| dir_name(d).starts_with("month=")),
        );
    }
    Ok(months)
}

fn sub_dirs(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && !dir_name(p).starts_with('.'))
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn total_size(files: &[PathBuf]) -> ArchiveResult<u64> {
    files
        .iter()
        .map(|f| Ok(fs::metadata(f)?.len()))
        .sum::<ArchiveResult<u64>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(ts: DateTime<Utc>, close: Decimal) -> Candle {
        Candle::new(
            "binance",
            "BTC/USDT",
            Timeframe::OneDay,
            ts,
            dec!(100),
            dec!(200),
            dec!(50),
            close,
            dec!(10),
        )
    }

    fn day(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_write_splits_by_month() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());
        let batch = CandleBatch::new(vec![
            at(day(1, 30), dec!(120)),
            at(day(1, 31), dec!(121)),
            at(day(2, 1), dec!(122)),
        ]);

        let files = archive
            .write_partition(&batch, "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("binance/BTC_USDT/1d/year=2024/month=01/data.parquet"));

        let january = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneDay, Some((2024, 1)))
            .unwrap();
        assert_eq!(january.len(), 2);
        let all = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneDay, None)
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.first_timestamp(), Some(day(1, 30)));
    }

    #[test]
    fn test_missing_dataset_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());
        let batch = archive
            .read_partition("coinbase", "ETH/USD", Timeframe::OneHour, None)
            .unwrap();
        assert!(batch.is_empty());
        assert!(archive.storage_stats().unwrap().is_empty());
    }

    #[test]
    fn test_later_writes_supersede_and_compact_merges() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());

        let first = CandleBatch::new(vec![at(day(3, 1), dec!(110)), at(day(3, 2), dec!(111))]);
        let second = CandleBatch::new(vec![at(day(3, 2), dec!(150)), at(day(3, 3), dec!(112))]);
        archive
            .write_partition(&first, "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap();
        let parts = archive
            .write_partition(&second, "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap();
        assert!(dir_name(&parts[0]).starts_with("part-"));

        let merged = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneDay, None)
            .unwrap();
        let closes: Vec<Decimal> = merged.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(110), dec!(150), dec!(112)]);

        let report = archive.compact("binance", "BTC/USDT", Timeframe::OneDay).unwrap();
        assert_eq!(report.partitions_compacted, 1);
        assert_eq!(report.files_before, 2);
        assert_eq!(report.files_after, 1);

        let month = archive.partition_dir("binance", "BTC/USDT", Timeframe::OneDay, 2024, 3);
        assert_eq!(parquet_files(&month).unwrap(), vec![month.join(DATA_FILE)]);
        let after = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneDay, None)
            .unwrap();
        assert_eq!(after, merged);
    }

    #[test]
    fn test_back_to_back_writes_keep_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());

        // Ten rewrites of one day, faster than the clock ticks
        for close in 100..110 {
            archive
                .write_partition(
                    &CandleBatch::new(vec![at(day(4, 1), Decimal::from(close))]),
                    "binance",
                    "BTC/USDT",
                    Timeframe::OneDay,
                )
                .unwrap();
        }

        let month = archive.partition_dir("binance", "BTC/USDT", Timeframe::OneDay, 2024, 4);
        let names: Vec<String> = parquet_files(&month).unwrap().iter().map(|p| dir_name(p)).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], DATA_FILE);
        assert_eq!(names[1], "part-000001.parquet");
        assert_eq!(names[9], "part-000009.parquet");

        let read = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneDay, None)
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read.as_slice()[0].close, dec!(109));
    }

    #[test]
    fn test_part_seq_parsing() {
        assert_eq!(part_seq("part-000042.parquet"), Some(42));
        assert_eq!(part_seq(DATA_FILE), None);
        assert_eq!(part_seq("part-x.parquet"), None);
    }

    #[test]
    fn test_compact_all_skips_single_file_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());

        let batch = CandleBatch::new(vec![at(day(5, 1), dec!(110))]);
        archive
            .write_partition(&batch, "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap();
        archive
            .write_partition(&batch, "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap();
        let single = CandleBatch::new(vec![Candle {
            exchange: "coinbase".into(),
            symbol: "ETH/USD".into(),
            ..at(day(5, 1), dec!(110))
        }]);
        archive
            .write_partition(&single, "coinbase", "ETH/USD", Timeframe::OneDay)
            .unwrap();

        let reports = archive.compact_all().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0.exchange, "binance");
        assert_eq!(reports[0].1.files_after, 1);

        let stats = archive.storage_stats().unwrap();
        assert!(stats.iter().all(|s| s.files == 1));
    }

    #[test]
    fn test_temp_files_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());
        let batch = CandleBatch::new(vec![at(day(5, 1), dec!(101))]);
        archive
            .write_partition(&batch, "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap();

        let month = archive.partition_dir("binance", "BTC/USDT", Timeframe::OneDay, 2024, 5);
        fs::write(month.join(".part-000001.parquet.tmp"), b"PAR1 half written").unwrap();

        let read = archive
            .read_partition("binance", "BTC/USDT", Timeframe::OneDay, None)
            .unwrap();
        assert_eq!(read, batch);

        let stats = archive.storage_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].files, 1);
        assert_eq!(stats[0].series.symbol, "BTC/USDT");
    }

    #[test]
    fn test_rejects_foreign_rows() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ColumnarArchive::new(dir.path());
        let mut stray = at(day(1, 1), dec!(100));
        stray.exchange = "coinbase".to_string();

        let err = archive
            .write_partition(&CandleBatch::new(vec![stray]), "binance", "BTC/USDT", Timeframe::OneDay)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidBatch(_)));
    }
}

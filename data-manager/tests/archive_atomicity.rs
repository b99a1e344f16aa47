//! Archive crash-safety
//!
//! A write that dies half way must never be visible to readers, and must not
//! damage the files that were already there.

use std::fs;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use data_manager::archive::ColumnarArchive;
use trading_common::data::{Candle, CandleBatch, Timeframe};

fn hourly(start_hour: i64, count: i64, close: Decimal) -> CandleBatch {
    let base = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
    CandleBatch::new(
        (start_hour..start_hour + count)
            .map(|h| {
                Candle::new(
                    "coinbase",
                    "ETH/USD",
                    Timeframe::OneHour,
                    base + Duration::hours(h),
                    dec!(2300),
                    dec!(2320),
                    dec!(2290),
                    close,
                    dec!(40),
                )
            })
            .collect(),
    )
}

#[test]
fn test_failed_compaction_leaves_partition_readable() {
    let dir = tempfile::tempdir().unwrap();
    let archive = ColumnarArchive::new(dir.path());

    archive
        .write_partition(&hourly(0, 12, dec!(2300)), "coinbase", "ETH/USD", Timeframe::OneHour)
        .unwrap();
    archive
        .write_partition(&hourly(12, 12, dec!(2310)), "coinbase", "ETH/USD", Timeframe::OneHour)
        .unwrap();
    let before = archive
        .read_partition("coinbase", "ETH/USD", Timeframe::OneHour, Some((2024, 2)))
        .unwrap();
    assert_eq!(before.len(), 24);

    // Occupy the temp path so the merged file cannot be created
    let month = archive.partition_dir("coinbase", "ETH/USD", Timeframe::OneHour, 2024, 2);
    fs::create_dir(month.join(".data.parquet.tmp")).unwrap();

    assert!(archive.compact("coinbase", "ETH/USD", Timeframe::OneHour).is_err());

    let after = archive
        .read_partition("coinbase", "ETH/USD", Timeframe::OneHour, Some((2024, 2)))
        .unwrap();
    assert_eq!(after, before);
    let stats = archive.storage_stats().unwrap();
    assert_eq!(stats[0].files, 2);
}

#[test]
fn test_leftover_temp_file_does_not_shadow_data() {
    let dir = tempfile::tempdir().unwrap();
    let archive = ColumnarArchive::new(dir.path());
    let batch = hourly(0, 6, dec!(2305));
    archive
        .write_partition(&batch, "coinbase", "ETH/USD", Timeframe::OneHour)
        .unwrap();

    let month = archive.partition_dir("coinbase", "ETH/USD", Timeframe::OneHour, 2024, 2);
    let data_file = month.join("data.parquet");
    let original = fs::read(&data_file).unwrap();
    fs::write(month.join(".data.parquet.tmp"), b"PAR1 truncated").unwrap();

    let read = archive
        .read_partition("coinbase", "ETH/USD", Timeframe::OneHour, None)
        .unwrap();
    assert_eq!(read, batch);
    assert_eq!(fs::read(&data_file).unwrap(), original);

    // Compaction of a single-file month is a no-op and leaves the file alone
    let report = archive.compact("coinbase", "ETH/USD", Timeframe::OneHour).unwrap();
    assert_eq!(report.partitions_compacted, 0);
    assert_eq!(fs::read(&data_file).unwrap(), original);
}

//! `compact`: merge small archive files

use anyhow::Result;
use clap::Args;
use tracing::info;

use trading_common::data::Timeframe;

use crate::archive::{ColumnarArchive, DatasetStats};
use crate::config::Settings;
use crate::provider::{symbol, Exchange};

#[derive(Args)]
pub struct CompactArgs {
    /// Compact one dataset; all datasets when omitted
    #[arg(long, requires_all = ["symbol", "timeframe"])]
    pub exchange: Option<Exchange>,

    #[arg(long, requires = "exchange")]
    pub symbol: Option<String>,

    #[arg(long, requires = "exchange")]
    pub timeframe: Option<Timeframe>,
}

pub fn execute(args: CompactArgs, settings: &Settings) -> Result<i32> {
    let archive = ColumnarArchive::new(&settings.storage.archive_root);

    if let (Some(exchange), Some(raw_symbol), Some(timeframe)) =
        (args.exchange, args.symbol.as_deref(), args.timeframe)
    {
        let symbol = symbol::canonical(raw_symbol)?;
        let report = archive.compact(exchange.as_str(), &symbol, timeframe)?;
        info!(
            %exchange,
            %symbol,
            %timeframe,
            partitions = report.partitions_compacted,
            files_before = report.files_before,
            files_after = report.files_after,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "compaction summary"
        );
        return Ok(0);
    }

    let before = archive.storage_stats()?;
    if before.is_empty() {
        info!(root = %archive.root().display(), "no parquet files found");
        return Ok(0);
    }
    let (files_before, bytes_before) = totals(&before);
    info!(datasets = before.len(), files = files_before, bytes = bytes_before, "archive before compaction");

    let compacted = archive.compact_all()?;

    let (files_after, bytes_after) = totals(&archive.storage_stats()?);
    info!(
        datasets_compacted = compacted.len(),
        files_before,
        files_after,
        files_removed = files_before.saturating_sub(files_after),
        bytes_before,
        bytes_after,
        "compaction summary"
    );
    Ok(0)
}

fn totals(stats: &[DatasetStats]) -> (usize, u64) {
    stats
        .iter()
        .fold((0, 0), |(files, bytes), s| (files + s.files, bytes + s.total_bytes))
}

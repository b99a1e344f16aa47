//! `backfill`: fill one series from an exchange's REST API

use anyhow::Result;
use clap::Args;
use tracing::{error, info, warn};

use trading_common::data::Timeframe;
use trading_common::error::ErrorClassification;

use super::{open_store, shutdown_on_ctrl_c};
use crate::backfill::{BackfillPipeline, BackfillRequest};
use crate::config::Settings;
use crate::provider::{create_connector, Exchange};

#[derive(Args)]
pub struct BackfillArgs {
    /// Exchange to fetch from (binance, coinbase)
    #[arg(long, short)]
    pub exchange: Exchange,

    /// Pair in BASE/QUOTE form, e.g. BTC/USDT
    #[arg(long, short)]
    pub symbol: String,

    /// Candle interval (1m, 5m, 1h, 1d, ...)
    #[arg(long, short)]
    pub timeframe: Timeframe,

    /// Days back from now
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    /// Skip the parquet export
    #[arg(long)]
    pub no_archive: bool,

    /// Continue from the saved checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Candles per request; defaults to the exchange maximum
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// A failed run is logged and leaves its checkpoint; only configuration
/// errors turn into a non-zero exit.
pub async fn execute(args: BackfillArgs, settings: &Settings) -> Result<i32> {
    let connector = create_connector(args.exchange, settings)?;
    let store = open_store(settings).await?;
    let pipeline = BackfillPipeline::from_settings(store.clone(), settings);

    let mut request = BackfillRequest::new(args.exchange, &args.symbol, args.timeframe, args.days);
    request.export_to_archive = !args.no_archive;
    request.resume = args.resume;
    request.batch_size = args.batch_size;

    let shutdown = shutdown_on_ctrl_c();
    let mut shutdown_rx = shutdown.subscribe();
    let result = pipeline.run(connector, &request, Some(&mut shutdown_rx)).await;
    store.close().await;

    match result {
        Ok(report) => {
            info!(
                series = %report.series,
                start = %report.effective_start,
                end = %report.end,
                pages = report.pages,
                fetched = report.fetched,
                inserted = report.inserted,
                rejected = report.rejected,
                skipped_batches = report.skipped.len(),
                archived_files = report.archived_files.len(),
                "backfill summary"
            );
            if report.cancelled {
                warn!("backfill interrupted; rerun with --resume to continue");
            } else if let Some(integrity) = report.integrity.as_ref().filter(|i| i.has_issues()) {
                warn!(
                    gaps = integrity.gap_count,
                    missing = integrity.missing_candles,
                    invalid_ohlc = integrity.invalid_ohlc_count,
                    "stored series has integrity issues"
                );
            }
            Ok(0)
        }
        Err(e) if e.is_configuration() => Err(e.into()),
        Err(e) => {
            error!(
                exchange = %args.exchange,
                symbol = %args.symbol,
                timeframe = %args.timeframe,
                error = %e,
                "backfill failed; checkpoint kept for --resume"
            );
            Ok(0)
        }
    }
}

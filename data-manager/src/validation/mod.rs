//! Store-wide integrity validation
//!
//! Runs `validate_integrity` for every series in the store, writes a CSV
//! report and records each result in `data_quality_metadata`. Callers map the
//! outcome to a process exit status with [`exit_code`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::{IntegritySummary, TimeSeriesStore};

/// Nothing wrong
pub const EXIT_OK: i32 = 0;
/// At least one series has invalid rows, duplicates or gaps
pub const EXIT_ISSUES: i32 = 1;
/// Validation itself could not run
pub const EXIT_FAILED: i32 = 2;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub summaries: Vec<IntegritySummary>,
    pub report_path: PathBuf,
}

impl ValidationReport {
    pub fn total_issues(&self) -> u64 {
        self.summaries
            .iter()
            .map(|s| s.invalid_ohlc_count + s.duplicate_count + s.gap_count)
            .sum()
    }

    pub fn datasets_with_issues(&self) -> usize {
        self.summaries.iter().filter(|s| s.has_issues()).count()
    }
}

/// 0 when clean, 1 when issues were found, 2 when validation failed
pub fn exit_code(outcome: &PipelineResult<ValidationReport>) -> i32 {
    match outcome {
        Ok(report) if report.total_issues() > 0 => EXIT_ISSUES,
        Ok(_) => EXIT_OK,
        Err(_) => EXIT_FAILED,
    }
}

pub struct ValidationPipeline {
    store: Arc<TimeSeriesStore>,
    report_path: PathBuf,
}

impl ValidationPipeline {
    pub fn new(store: Arc<TimeSeriesStore>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            report_path: report_path.into(),
        }
    }

    pub fn from_settings(store: Arc<TimeSeriesStore>, settings: &Settings) -> Self {
        Self::new(store, &settings.storage.validation_report)
    }

    pub async fn run(&self) -> PipelineResult<ValidationReport> {
        let datasets = self.store.datasets().await?;
        if datasets.is_empty() {
            warn!("no data found in store");
        } else {
            info!(datasets = datasets.len(), "validating datasets");
        }

        let mut summaries = Vec::with_capacity(datasets.len());
        for series in datasets {
            let summary = self
                .store
                .validate_integrity(&series.symbol, series.timeframe, &series.exchange)
                .await?;

            if summary.has_issues() {
                warn!(
                    %series,
                    invalid_ohlc = summary.invalid_ohlc_count,
                    duplicates = summary.duplicate_count,
                    gaps = summary.gap_count,
                    missing = summary.missing_candles,
                    "integrity issues"
                );
            } else {
                info!(%series, records = summary.total_records, "ok");
            }

            self.store.record_validation(&summary).await?;
            summaries.push(summary);
        }

        write_report(&self.report_path, &summaries)?;

        let report = ValidationReport {
            summaries,
            report_path: self.report_path.clone(),
        };
        info!(
            datasets = report.summaries.len(),
            with_issues = report.datasets_with_issues(),
            total_issues = report.total_issues(),
            report = %report.report_path.display(),
            "validation summary"
        );
        Ok(report)
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    exchange: &'a str,
    symbol: &'a str,
    timeframe: &'a str,
    total_records: u64,
    first_timestamp: String,
    last_timestamp: String,
    invalid_ohlc_count: u64,
    duplicate_count: u64,
    gap_count: u64,
    missing_candles: i64,
    validated_at: String,
}

impl<'a> From<&'a IntegritySummary> for ReportRow<'a> {
    fn from(s: &'a IntegritySummary) -> Self {
        let ts = |t: Option<chrono::DateTime<chrono::Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
        Self {
            exchange: &s.series.exchange,
            symbol: &s.series.symbol,
            timeframe: s.series.timeframe.as_str(),
            total_records: s.total_records,
            first_timestamp: ts(s.first_timestamp),
            last_timestamp: ts(s.last_timestamp),
            invalid_ohlc_count: s.invalid_ohlc_count,
            duplicate_count: s.duplicate_count,
            gap_count: s.gap_count,
            missing_candles: s.missing_candles,
            validated_at: s.validated_at.to_rfc3339(),
        }
    }
}

const REPORT_HEADER: [&str; 11] = [
    "exchange",
    "symbol",
    "timeframe",
    "total_records",
    "first_timestamp",
    "last_timestamp",
    "invalid_ohlc_count",
    "duplicate_count",
    "gap_count",
    "missing_candles",
    "validated_at",
];

/// Write one CSV row per summary. The header is written even when empty.
pub fn write_report(path: &Path, summaries: &[IntegritySummary]) -> PipelineResult<()> {
    let report_err = |source: csv::Error| PipelineError::Report {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| report_err(e.into()))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(report_err)?;
    writer.write_record(REPORT_HEADER).map_err(report_err)?;
    for summary in summaries {
        writer.serialize(ReportRow::from(summary)).map_err(report_err)?;
    }
    writer.flush().map_err(|e| report_err(e.into()))?;
    Ok(())
}

//! `validate`: integrity check over every stored series

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::PipelineResult;
use crate::storage::TimeSeriesStore;
use crate::validation::{exit_code, ValidationPipeline, ValidationReport, EXIT_ISSUES, EXIT_OK};

#[derive(Args)]
pub struct ValidateArgs {
    /// CSV report path; defaults to `storage.validation_report`
    #[arg(long)]
    pub report: Option<PathBuf>,
}

pub async fn execute(args: ValidateArgs, settings: &Settings) -> i32 {
    let outcome = run(args, settings).await;
    let code = exit_code(&outcome);
    match (&outcome, code) {
        (Ok(_), EXIT_OK) => info!(code, "all validation checks passed"),
        (Ok(report), EXIT_ISSUES) => warn!(
            code,
            issues = report.total_issues(),
            "validation found issues"
        ),
        (Err(e), _) => error!(code, error = %e, "validation failed"),
        _ => {}
    }
    code
}

async fn run(args: ValidateArgs, settings: &Settings) -> PipelineResult<ValidationReport> {
    let store = Arc::new(TimeSeriesStore::open(&settings.storage).await?);
    store.init_schema().await?;
    let report_path = args
        .report
        .unwrap_or_else(|| settings.storage.validation_report.clone());

    let outcome = ValidationPipeline::new(store.clone(), report_path).run().await;
    store.close().await;
    outcome
}

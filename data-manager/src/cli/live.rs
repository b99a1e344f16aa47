//! `live`: stream closed klines into the store until Ctrl-C

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::{open_store, shutdown_on_ctrl_c};
use crate::config::{LiveConfig, Settings};
use crate::live::LivePipeline;

#[derive(Args)]
pub struct LiveArgs {
    /// Stream definitions and buffer policy
    #[arg(long, default_value = "configs/streaming.yaml")]
    pub config: PathBuf,

    /// Also write every flushed batch to the parquet archive
    #[arg(long)]
    pub archive: bool,
}

pub async fn execute(args: LiveArgs, settings: &Settings) -> Result<i32> {
    let config = LiveConfig::load(&args.config)
        .with_context(|| format!("invalid stream config {}", args.config.display()))?;
    let store = open_store(settings).await?;

    let shutdown = shutdown_on_ctrl_c();
    let pipeline = LivePipeline::from_settings(config, store.clone(), settings, args.archive);
    let result = pipeline.run(&shutdown).await;
    store.close().await;

    result?;
    Ok(0)
}

//! `coverage`: stored date range per series

use anyhow::Result;

use super::open_store;
use crate::config::Settings;

pub async fn execute(settings: &Settings) -> Result<i32> {
    let store = open_store(settings).await?;
    let rows = store.coverage().await?;
    store.close().await;

    if rows.is_empty() {
        println!("No data stored in {}", settings.storage.database_path.display());
        return Ok(0);
    }

    println!(
        "{:<10} {:<12} {:<4} {:<20} {:<20} {:>10} {:>6}",
        "EXCHANGE", "SYMBOL", "TF", "FIRST", "LAST", "CANDLES", "DAYS"
    );
    for row in rows {
        println!(
            "{:<10} {:<12} {:<4} {:<20} {:<20} {:>10} {:>6}",
            row.series.exchange,
            row.series.symbol,
            row.series.timeframe.as_str(),
            row.first_timestamp.format("%Y-%m-%d %H:%M"),
            row.last_timestamp.format("%Y-%m-%d %H:%M"),
            row.total_candles,
            row.days_covered
        );
    }
    Ok(0)
}

//! `init-db`: create tables, indexes and views

use anyhow::Result;
use tracing::info;

use super::open_store;
use crate::config::Settings;

pub async fn execute(settings: &Settings) -> Result<i32> {
    let store = open_store(settings).await?;
    let objects = store.schema_objects().await?;
    store.close().await;

    info!(
        path = %settings.storage.database_path.display(),
        objects = ?objects,
        "database ready"
    );
    Ok(0)
}

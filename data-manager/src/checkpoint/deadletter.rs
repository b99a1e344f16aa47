use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use super::{write_atomic, RecoveryError, RecoveryResult};

/// One terminal failure event. Never rewritten once on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub failed_at: DateTime<Utc>,
    pub reason: String,
    pub count: usize,
    pub records: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct DeadLetterStore {
    dir: PathBuf,
}

impl DeadLetterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture `records` with `reason`. Returns the file written, or `None` when
    /// there was nothing to write or the write failed. Failures are logged and
    /// swallowed so the caller keeps processing.
    pub fn deadletter<T: Serialize>(&self, records: &[T], reason: &str) -> Option<PathBuf> {
        if records.is_empty() {
            return None;
        }
        match self.try_deadletter(records, reason) {
            Ok(path) => {
                warn!(
                    path = %path.display(),
                    count = records.len(),
                    reason,
                    "records moved to dead-letter"
                );
                Some(path)
            }
            Err(e) => {
                error!(count = records.len(), reason, error = %e, "failed to write dead-letter entry");
                None
            }
        }
    }

    /// `deadletter` on the blocking pool, for callers on an async worker.
    pub async fn deadletter_blocking<T>(&self, records: Vec<T>, reason: String) -> Option<PathBuf>
    where
        T: Serialize + Send + 'static,
    {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.deadletter(&records, &reason)).await {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "dead-letter task did not complete");
                None
            }
        }
    }

    /// Fallible form of `deadletter`.
    pub fn try_deadletter<T: Serialize>(&self, records: &[T], reason: &str) -> RecoveryResult<PathBuf> {
        let failed_at = Utc::now();
        let path = self.dir.join(format!(
            "{}_{}.json",
            failed_at.format("%Y%m%dT%H%M%S%.6fZ"),
            &Uuid::new_v4().simple().to_string()[..8]
        ));

        let records = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RecoveryError::json(&path, e))?;
        let entry = DeadLetterEntry {
            failed_at,
            reason: reason.to_string(),
            count: records.len(),
            records,
        };
        let body = serde_json::to_vec_pretty(&entry).map_err(|e| RecoveryError::json(&path, e))?;
        write_atomic(&path, &body)?;
        Ok(path)
    }

    /// Entry files, oldest first.
    pub fn list(&self) -> RecoveryResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RecoveryError::io(&self.dir, e)),
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| !n.starts_with('.') && n.ends_with(".json"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn read(&self, path: &Path) -> RecoveryResult<DeadLetterEntry> {
        let body = fs::read(path).map_err(|e| RecoveryError::io(path, e))?;
        serde_json::from_slice(&body).map_err(|e| RecoveryError::json(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use trading_common::data::{Candle, Timeframe};

    fn candle(hour: u32) -> Candle {
        Candle::new(
            "binance",
            "BTC/USDT",
            Timeframe::OneHour,
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            dec!(100),
            dec!(90),
            dec!(95),
            dec!(98),
            dec!(1),
        )
    }

    #[test]
    fn test_entries_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeadLetterStore::new(dir.path().join("dead_letter"));
        assert!(store.list().unwrap().is_empty());

        let first = store.deadletter(&[candle(0), candle(1)], "high below open").unwrap();
        let second = store.deadletter(&[candle(2)], "flush retries exhausted").unwrap();
        assert_ne!(first, second);

        let files = store.list().unwrap();
        assert_eq!(files.len(), 2);

        let entry = store.read(&first).unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.reason, "high below open");
        let back: Candle = serde_json::from_value(entry.records[1].clone()).unwrap();
        assert_eq!(back, candle(1));
    }

    #[test]
    fn test_empty_records_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeadLetterStore::new(dir.path());
        assert_eq!(store.deadletter::<Candle>(&[], "nothing"), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();

        let store = DeadLetterStore::new(&blocker);
        assert_eq!(store.deadletter(&[candle(0)], "reason"), None);
    }

    #[tokio::test]
    async fn test_blocking_pool_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeadLetterStore::new(dir.path());

        let path = store
            .deadletter_blocking(vec![candle(3), candle(4)], "retries exhausted".to_string())
            .await
            .unwrap();
        assert_eq!(store.list().unwrap(), vec![path.clone()]);
        assert_eq!(store.read(&path).unwrap().count, 2);

        assert_eq!(store.deadletter_blocking::<Candle>(Vec::new(), String::new()).await, None);
    }
}

//! Resume points and dead-letter capture
//!
//! One JSON checkpoint per series, overwritten after every persisted page and
//! removed when a backfill covers its whole range. Terminal failures land in
//! the dead-letter directory as one immutable JSON file per event.

mod deadletter;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use trading_common::data::SeriesKey;
use trading_common::error::{ErrorCategory, ErrorClassification};

pub use deadletter::{DeadLetterEntry, DeadLetterStore};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RecoveryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RecoveryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        RecoveryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        RecoveryError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl ErrorClassification for RecoveryError {
    fn category(&self) -> ErrorCategory {
        match self {
            RecoveryError::Io { .. } => ErrorCategory::Transient,
            RecoveryError::Json { .. } => ErrorCategory::Permanent,
        }
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Progress marker for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(flatten)]
    pub series: SeriesKey,
    /// Timestamp of the newest persisted candle
    pub last_timestamp: DateTime<Utc>,
    /// Candles persisted so far in this run
    pub record_count: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{exchange}_{BASE_QUOTE}_{timeframe}.json`
    pub fn path_for(&self, key: &SeriesKey) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.json",
            key.exchange,
            key.symbol_slug(),
            key.timeframe
        ))
    }

    /// Write or overwrite the checkpoint for `key`.
    pub fn save(
        &self,
        key: &SeriesKey,
        last_timestamp: DateTime<Utc>,
        record_count: u64,
    ) -> RecoveryResult<Checkpoint> {
        let checkpoint = Checkpoint {
            series: key.clone(),
            last_timestamp,
            record_count,
            saved_at: Utc::now(),
        };
        let path = self.path_for(key);
        let body =
            serde_json::to_vec_pretty(&checkpoint).map_err(|e| RecoveryError::json(&path, e))?;
        write_atomic(&path, &body)?;
        debug!(series = %key, last = %last_timestamp, record_count, "checkpoint saved");
        Ok(checkpoint)
    }

    pub fn load(&self, key: &SeriesKey) -> RecoveryResult<Option<Checkpoint>> {
        let path = self.path_for(key);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RecoveryError::io(&path, e)),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| RecoveryError::json(&path, e))
    }

    /// Remove the checkpoint. Missing checkpoints are fine.
    pub fn delete(&self, key: &SeriesKey) -> RecoveryResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(series = %key, "checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecoveryError::io(&path, e)),
        }
    }
}

/// Write to a dot-prefixed sibling, fsync, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> RecoveryResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| RecoveryError::io(dir, e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.tmp", name));

    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(body)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(RecoveryError::io(&tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| RecoveryError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use trading_common::data::Timeframe;

    fn key() -> SeriesKey {
        SeriesKey::new("binance", "BTC/USDT", Timeframe::OneHour)
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert_eq!(store.load(&key()).unwrap(), None);

        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();
        store.save(&key(), t1, 6).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        store.save(&key(), t2, 10).unwrap();

        let loaded = store.load(&key()).unwrap().unwrap();
        assert_eq!(loaded.last_timestamp, t2);
        assert_eq!(loaded.record_count, 10);
        assert_eq!(loaded.series, key());
        assert!(store.path_for(&key()).ends_with("binance_BTC_USDT_1h.json"));

        store.delete(&key()).unwrap();
        assert_eq!(store.load(&key()).unwrap(), None);
        store.delete(&key()).unwrap();
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"));
        store.save(&key(), Utc::now(), 1).unwrap();

        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["binance_BTC_USDT_1h.json".to_string()]);
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        fs::write(store.path_for(&key()), b"{ not json").unwrap();
        let err = store.load(&key()).unwrap_err();
        assert!(matches!(err, RecoveryError::Json { .. }));
        assert!(err.is_permanent());
    }
}

//! Declarative stream configuration for the live pipeline
//!
//! ```yaml
//! streams:
//!   - symbol: BTC/USDT
//!     timeframes: [1m, 5m]
//!     enabled: true
//! buffer:
//!   max_size_records: 1000
//!   flush_interval_seconds: 60
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};
use trading_common::data::Timeframe;
use trading_common::error::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    pub streams: Vec<StreamSpec>,
    pub buffer: BufferPolicy,
}

/// One symbol and the kline intervals to subscribe for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferPolicy {
    /// Buffered candles that trigger an immediate flush
    pub max_size_records: usize,
    pub flush_interval_seconds: u64,
}

impl BufferPolicy {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }
}

impl LiveConfig {
    /// Load and validate a stream config file. Format follows the extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound(path.display().to_string()));
        }

        let config: LiveConfig = Config::builder()
            .add_source(File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.buffer.max_size_records == 0 {
            return Err(ConfigurationError::invalid_value(
                "buffer.max_size_records",
                "must be greater than zero",
            ));
        }
        if self.buffer.flush_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "buffer.flush_interval_seconds",
                "must be greater than zero",
            ));
        }
        for stream in &self.streams {
            if stream.symbol.trim().is_empty() {
                return Err(ConfigurationError::MissingField("streams[].symbol".into()));
            }
            if stream.enabled && stream.timeframes.is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("streams[{}].timeframes", stream.symbol),
                    "an enabled stream needs at least one timeframe",
                ));
            }
        }
        Ok(())
    }

    pub fn enabled_streams(&self) -> impl Iterator<Item = &StreamSpec> {
        self.streams.iter().filter(|s| s.enabled)
    }
}

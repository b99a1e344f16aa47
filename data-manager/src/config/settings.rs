//! Application settings and configuration

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use trading_common::retry::RetryPolicy;

/// Main application settings
///
/// Built once at startup and handed by reference to every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub binance: BinanceSettings,
    #[serde(default)]
    pub coinbase: CoinbaseSettings,
    /// Range fetcher retry schedule
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Stream client reconnect schedule
    #[serde(default)]
    pub stream: StreamSettings,
    /// Live flush retry schedule
    #[serde(default)]
    pub live: LiveSettings,
}

/// Where durable state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Root of the parquet archive
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_dead_letter_dir")]
    pub dead_letter_dir: PathBuf,
    #[serde(default = "default_validation_report")]
    pub validation_report: PathBuf,
    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/crypto.db")
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("data/lake")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/checkpoints")
}

fn default_dead_letter_dir() -> PathBuf {
    PathBuf::from("data/dead_letter")
}

fn default_validation_report() -> PathBuf {
    PathBuf::from("data/validation_report.csv")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    4
}

impl StorageSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            archive_root: default_archive_root(),
            checkpoint_dir: default_checkpoint_dir(),
            dead_letter_dir: default_dead_letter_dir(),
            validation_report: default_validation_report(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

/// REST/WebSocket endpoints and pacing for one exchange.
///
/// Both exchange sections deserialize into this shape; the per-exchange
/// structs only differ in their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub rest_url: String,
    pub ws_url: String,
    /// Largest page the exchange serves; requested limits are clamped to it
    pub max_page_size: usize,
    /// Fixed pause between consecutive pages of a range fetch
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
}

impl HttpSettings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Binance spot settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinanceSettings {
    #[serde(default = "default_binance_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_binance_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_binance_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_binance_page_delay")]
    pub page_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_binance_rpm")]
    pub requests_per_minute: u32,
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_binance_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_binance_page_size() -> usize {
    1000
}

fn default_binance_page_delay() -> u64 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

fn default_binance_rpm() -> u32 {
    1200
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            rest_url: default_binance_rest_url(),
            ws_url: default_binance_ws_url(),
            max_page_size: default_binance_page_size(),
            page_delay_ms: default_binance_page_delay(),
            request_timeout_secs: default_request_timeout(),
            requests_per_minute: default_binance_rpm(),
        }
    }
}

impl From<&BinanceSettings> for HttpSettings {
    fn from(s: &BinanceSettings) -> Self {
        HttpSettings {
            rest_url: s.rest_url.clone(),
            ws_url: s.ws_url.clone(),
            max_page_size: s.max_page_size,
            page_delay_ms: s.page_delay_ms,
            request_timeout_secs: s.request_timeout_secs,
            requests_per_minute: s.requests_per_minute,
        }
    }
}

/// Coinbase Exchange settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseSettings {
    #[serde(default = "default_coinbase_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_coinbase_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_coinbase_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_coinbase_page_delay")]
    pub page_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_coinbase_rpm")]
    pub requests_per_minute: u32,
}

fn default_coinbase_rest_url() -> String {
    "https://api.exchange.coinbase.com".to_string()
}

fn default_coinbase_ws_url() -> String {
    "wss://ws-feed.exchange.coinbase.com".to_string()
}

fn default_coinbase_page_size() -> usize {
    300
}

fn default_coinbase_page_delay() -> u64 {
    500
}

fn default_coinbase_rpm() -> u32 {
    600
}

impl Default for CoinbaseSettings {
    fn default() -> Self {
        Self {
            rest_url: default_coinbase_rest_url(),
            ws_url: default_coinbase_ws_url(),
            max_page_size: default_coinbase_page_size(),
            page_delay_ms: default_coinbase_page_delay(),
            request_timeout_secs: default_request_timeout(),
            requests_per_minute: default_coinbase_rpm(),
        }
    }
}

impl From<&CoinbaseSettings> for HttpSettings {
    fn from(s: &CoinbaseSettings) -> Self {
        HttpSettings {
            rest_url: s.rest_url.clone(),
            ws_url: s.ws_url.clone(),
            max_page_size: s.max_page_size,
            page_delay_ms: s.page_delay_ms,
            request_timeout_secs: s.request_timeout_secs,
            requests_per_minute: s.requests_per_minute,
        }
    }
}

/// Page retry settings for range fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_fetch_base_delay")]
    pub base_delay_secs: f64,
    /// Overrides the connector page size when set
    #[serde(default)]
    pub batch_size: Option<usize>,
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_fetch_base_delay() -> f64 {
    2.0
}

impl FetchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, secs(self.base_delay_secs))
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_fetch_attempts(),
            base_delay_secs: default_fetch_base_delay(),
            batch_size: None,
        }
    }
}

/// Stream reconnect settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_reconnect_floor")]
    pub reconnect_floor_secs: f64,
    #[serde(default = "default_reconnect_ceiling")]
    pub reconnect_ceiling_secs: f64,
    /// Fraction of the delay randomised either way
    #[serde(default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,
    /// Capacity of the subscription command channel
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Client ping cadence; 0 disables
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Reconnect forever when unset
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
}

fn default_reconnect_floor() -> f64 {
    1.0
}

fn default_reconnect_ceiling() -> f64 {
    300.0
}

fn default_reconnect_jitter() -> f64 {
    0.1
}

fn default_command_buffer() -> usize {
    64
}

fn default_ping_interval() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl StreamSettings {
    pub fn reconnect_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::reconnect(secs(self.reconnect_ceiling_secs))
            .with_jitter(self.reconnect_jitter);
        policy.base_delay = secs(self.reconnect_floor_secs);
        policy.max_attempts = self.reconnect_max_attempts;
        policy
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_floor_secs: default_reconnect_floor(),
            reconnect_ceiling_secs: default_reconnect_ceiling(),
            reconnect_jitter: default_reconnect_jitter(),
            command_buffer: default_command_buffer(),
            ping_interval_secs: default_ping_interval(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_max_attempts: None,
        }
    }
}

/// Live flush retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSettings {
    #[serde(default = "default_flush_attempts")]
    pub flush_max_attempts: u32,
    #[serde(default = "default_flush_base_delay")]
    pub flush_base_delay_secs: f64,
}

fn default_flush_attempts() -> u32 {
    3
}

fn default_flush_base_delay() -> f64 {
    2.0
}

impl LiveSettings {
    pub fn flush_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.flush_max_attempts, secs(self.flush_base_delay_secs))
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            flush_max_attempts: default_flush_attempts(),
            flush_base_delay_secs: default_flush_base_delay(),
        }
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("DATA_MANAGER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // e.g. DATA_MANAGER__STORAGE__DATABASE_PATH
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    fn config_dir() -> String {
        std::env::var("DATA_MANAGER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Built-in defaults with every path rooted under `data_dir`. Handy for tests.
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let root: PathBuf = data_dir.into();
        let mut settings = Self::default();
        settings.storage.database_path = root.join("crypto.db");
        settings.storage.archive_root = root.join("lake");
        settings.storage.checkpoint_dir = root.join("checkpoints");
        settings.storage.dead_letter_dir = root.join("dead_letter");
        settings.storage.validation_report = root.join("validation_report.csv");
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.binance.max_page_size, 1000);
        assert_eq!(settings.coinbase.max_page_size, 300);
        assert_eq!(settings.storage.database_path, PathBuf::from("data/crypto.db"));
        assert_eq!(settings.fetch.retry_policy(), RetryPolicy::range_fetch());
    }

    #[test]
    fn test_reconnect_policy_from_settings() {
        let stream = StreamSettings {
            reconnect_ceiling_secs: 60.0,
            ..Default::default()
        };
        let policy = stream.reconnect_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_section_keeps_exchange_defaults() {
        let settings: Settings = Config::builder()
            .set_override("coinbase.page_delay_ms", 250)
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap();
        assert_eq!(settings.coinbase.page_delay_ms, 250);
        assert_eq!(settings.coinbase.max_page_size, 300);
        assert_eq!(settings.binance, BinanceSettings::default());
    }

    #[test]
    fn test_rooted_at() {
        let settings = Settings::rooted_at("/tmp/run");
        assert_eq!(settings.storage.archive_root, PathBuf::from("/tmp/run/lake"));
        assert_eq!(
            settings.storage.dead_letter_dir,
            PathBuf::from("/tmp/run/dead_letter")
        );
    }
}

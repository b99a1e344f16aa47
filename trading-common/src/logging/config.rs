use std::env;

use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc, FormatTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Appended to the base level: per-statement sqlx logs and per-frame
/// tungstenite logs drown the pipeline's own events.
const QUIET_DEPENDENCIES: &str = "sqlx=warn,tungstenite=warn,tokio_tungstenite=warn,hyper=warn";

type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One object per event for log shipping
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else if s.eq_ignore_ascii_case("compact") {
            LogFormat::Compact
        } else {
            LogFormat::Pretty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
    None,
}

impl TimestampFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    pub level: String,
    pub include_location: bool,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            timestamps: TimestampFormat::default(),
            level: "info".to_string(),
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let enabled = |name: &str| matches!(env::var(name).as_deref(), Ok("1") | Ok("true"));

        Self {
            format: env::var("LOG_FORMAT").map(|s| LogFormat::parse(&s)).unwrap_or(defaults.format),
            timestamps: env::var("LOG_TIMESTAMPS")
                .map(|s| TimestampFormat::parse(&s))
                .unwrap_or(defaults.timestamps),
            level: env::var("LOG_LEVEL").unwrap_or(defaults.level),
            include_location: enabled("LOG_LOCATION"),
            include_thread_ids: enabled("LOG_THREAD_IDS"),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{},{}", self.level, QUIET_DEPENDENCIES)))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig) -> InitResult {
    match config.timestamps {
        TimestampFormat::Local => install(&config, ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".into())),
        TimestampFormat::Utc => install(&config, ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".into())),
        TimestampFormat::None => install(&config, ()),
    }
}

fn install<T>(config: &LogConfig, timer: T) -> InitResult
where
    T: FormatTime + Send + Sync + 'static,
{
    let ansi = atty::is(atty::Stream::Stdout);
    let layer = fmt::layer()
        .with_timer(timer)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    let registry = tracing_subscriber::registry().with(config.filter());

    match config.format {
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init()?,
        LogFormat::Compact => registry.with(layer.compact().with_ansi(ansi)).try_init()?,
        LogFormat::Pretty => registry.with(layer.with_ansi(ansi)).try_init()?,
    }
    Ok(())
}

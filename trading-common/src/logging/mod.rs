//! Global `tracing` subscriber for the pipeline binaries
//!
//! Read from the environment:
//!
//! - `RUST_LOG`: full filter, overrides everything else
//! - `LOG_LEVEL`: base level when `RUST_LOG` is unset (default `info`)
//! - `LOG_FORMAT`: `pretty`, `compact` or `json`
//! - `LOG_TIMESTAMPS`: `local`, `utc` or `none`
//! - `LOG_LOCATION`, `LOG_THREAD_IDS`: `1`/`true` to enable

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};

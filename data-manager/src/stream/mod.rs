//! Binance market-data stream
//!
//! A single long-lived WebSocket connection with automatic reconnect. Raw
//! frames are decoded into [`messages::StreamMessage`], validated, and handed
//! to registered handlers as [`StreamEvent`]s. Only closed klines are
//! delivered; in-progress updates are discarded.

mod client;
pub mod messages;
mod state;

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use trading_common::error::{ErrorCategory, ErrorClassification};

use crate::provider::ProviderError;

pub use client::{EventKind, StreamClient, StreamEvent, StreamHandler, StreamStats};
pub use state::{ConnectionState, InvalidTransition, StateCell};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),

    #[error("Stream client is already running")]
    AlreadyRunning,

    #[error("Stream client has stopped")]
    Closed,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to encode control request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ErrorClassification for StreamError {
    fn category(&self) -> ErrorCategory {
        match self {
            StreamError::WebSocket(_) | StreamError::ConnectTimeout(_) => ErrorCategory::Transient,
            StreamError::ReconnectExhausted(_) => ErrorCategory::Permanent,
            StreamError::AlreadyRunning | StreamError::Closed | StreamError::Encode(_) => {
                ErrorCategory::Internal
            }
            StreamError::Provider(e) => e.category(),
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;

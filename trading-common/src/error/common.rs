use std::time::Duration;
use thiserror::Error;

/// HTTP transport failures below the level of an exchange response
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NetworkError {
    #[error("Could not connect: {0}")]
    Connection(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Request(String),

    /// Body could not be read after a successful status line
    #[error("Reading response failed: {0}")]
    Receive(String),
}

/// Bad settings, unknown exchange or timeframe, malformed symbol. Never retried.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

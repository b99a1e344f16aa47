use std::time::Duration;

use super::common::{ConfigurationError, NetworkError};
use crate::data::DataError;

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Worth retrying: timeouts, 5xx, dropped connections
    Transient,
    /// Retrying returns the same answer: rejected symbol, malformed payload
    Permanent,
    /// Rate limited or out of pool capacity; retry after a longer pause
    ResourceExhausted,
    /// Fail fast before any work is done
    Configuration,
    /// Unexpected state
    Internal,
}

pub trait ErrorClassification {
    fn category(&self) -> ErrorCategory;

    /// Rate limits count as transient
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    fn is_permanent(&self) -> bool {
        self.category() == ErrorCategory::Permanent
    }

    fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Lower bound for the next retry delay
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Sinks that cannot fail
impl ErrorClassification for std::convert::Infallible {
    fn category(&self) -> ErrorCategory {
        match *self {}
    }
}

impl ErrorClassification for NetworkError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Transient
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        Some(match self {
            NetworkError::Connection(_) => Duration::from_secs(1),
            NetworkError::Timeout(_) => Duration::from_millis(500),
            _ => Duration::from_millis(100),
        })
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl ErrorClassification for DataError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

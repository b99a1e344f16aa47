//! Reusable retry policy
//!
//! One exponential-backoff schedule shared by the range fetcher (page
//! retries), the stream client (reconnects) and the live flusher (failed
//! flushes). Attempts are 1-based: `delay_for(1)` is the wait after the first
//! failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::ErrorClassification;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first failure; `None` retries forever
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the computed delay added or removed at random (0.1 = ±10%)
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.0,
        }
    }

    /// Page retries: 3 attempts waiting 2s, 4s, 8s.
    pub fn range_fetch() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    /// Stream reconnects: unbounded, 1s floor doubling up to `ceiling`, ±10% jitter.
    pub fn reconnect(ceiling: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: ceiling,
            jitter: 0.1,
        }
    }

    /// Live buffer flushes: 3 attempts waiting 2s, 4s, 8s.
    pub fn flush() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another retry is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Backoff for the given attempt before jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Backoff for the given attempt with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::range_fetch()
    }
}

/// Run `operation` until it succeeds, the policy is exhausted, or it fails
/// with a configuration error. Returns the last error.
///
/// The closure receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.is_configuration() || !policy.allows(attempt) {
                    debug!(attempt, error = %err, "giving up");
                    return Err(err);
                }

                let delay = policy
                    .delay_for(attempt)
                    .max(err.suggested_retry_delay().unwrap_or_default());
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

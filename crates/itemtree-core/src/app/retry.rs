//! Retry policy: bounded attempts with exponential backoff around remote calls.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RetryConfig;
use crate::domain::Retryable;
use crate::ports::Clock;

/// Upper bound for a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Retry policy for remote calls made by the expansion stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
        )
    }

    /// Delay before the retry that follows attempt number `attempts` (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at five minutes.
    ///
    /// Example with base_delay=500ms, multiplier=2.0:
    /// - attempt 1: 500ms
    /// - attempt 2: 1s
    /// - attempt 3: 2s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, clock: &dyn Clock, mut op: F) -> RetryOutcome<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last_attempt = clock.now();
            match op().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(attempt, "retryable failure, backing off");
                    tokio::time::sleep(self.next_delay(attempt)).await;
                }
                result => {
                    return RetryOutcome {
                        result,
                        attempts: attempt,
                        last_attempt,
                    };
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Result of a retried call plus the bookkeeping that ends up in tombstones.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, Exhausted<E>> {
        self.result.map_err(|error| Exhausted {
            error,
            attempts: self.attempts,
            last_attempt: self.last_attempt,
        })
    }
}

/// A failure that survived every permitted attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.attempts)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Exhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

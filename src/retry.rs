//! Retry with exponential backoff and jitter.
//!
//! Only errors the caller classifies as transient are retried; anything else
//! is returned on the first failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::ConvergentError;

/// Backoff settings for transient remote failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Creates a config with the given attempt count and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Returns the initial delay.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Returns the maximum delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Jittered exponential delay schedule for one retry loop.
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    failures: u32,
    delay: Duration,
}

impl<'a> Backoff<'a> {
    /// Starts a schedule with no recorded failures.
    #[must_use]
    pub const fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
            delay: config.initial_delay(),
        }
    }

    /// Records a failure and returns the delay before the next attempt, or
    /// `None` once `max_attempts` is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.config.max_attempts.max(1) {
            return None;
        }

        // 0.5x to 1.5x of the nominal delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);

        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.multiplier).min(self.config.max_delay().as_secs_f64()),
        );
        Some(jittered)
    }

    /// Returns the number of failures recorded so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// attempts.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once
/// `max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Backoff::new(config);

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                let Some(delay) = backoff.next_delay() else {
                    error!(
                        operation = %operation_name,
                        attempt = backoff.failures(),
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                };

                warn!(
                    operation = %operation_name,
                    attempt = backoff.failures(),
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retries a remote call on transient [`ConvergentError`]s.
///
/// # Errors
///
/// See [`retry_with_backoff`].
pub async fn retry_remote<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, ConvergentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConvergentError>>,
{
    retry_with_backoff(config, operation_name, ConvergentError::is_retryable, operation).await
}

//! Long-running operation polling.
//!
//! Polls are spaced by a fixed interval and bounded by a maximum wait.
//! Transient errors from individual polls are retried with backoff inside
//! the same bound. Every sleep, between polls or between retries, races the
//! cancellation token.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, RemoteError, Result};
use crate::retry::{Backoff, RetryConfig};

use super::client::{Mutation, RemoteClient, ResourceRef};

/// Polls between progress messages at info level.
const PROGRESS_EVERY: u32 = 10;

/// Interval and bound for operation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between polls.
    pub interval: Duration,
    /// Longest total wait before giving up.
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
        }
    }
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// Waits on operations and resource removal for one resource.
pub struct Poller<'a> {
    client: &'a dyn RemoteClient,
    policy: PollPolicy,
    retry: &'a RetryConfig,
    cancel: &'a CancellationToken,
    remote_id: &'a str,
}

impl<'a> Poller<'a> {
    /// Creates a poller acting on behalf of `remote_id`.
    #[must_use]
    pub const fn new(
        client: &'a dyn RemoteClient,
        policy: PollPolicy,
        retry: &'a RetryConfig,
        cancel: &'a CancellationToken,
        remote_id: &'a str,
    ) -> Self {
        Self {
            client,
            policy,
            retry,
            cancel,
            remote_id,
        }
    }

    /// Waits for a mutation to take effect, returning the operation name if
    /// one was awaited.
    ///
    /// # Errors
    ///
    /// See [`Poller::wait_operation`].
    pub async fn settle(&self, mutation: Mutation) -> Result<Option<String>> {
        match mutation {
            Mutation::Completed => Ok(None),
            Mutation::Pending { operation } => {
                self.wait_operation(&operation).await?;
                Ok(Some(operation))
            }
        }
    }

    /// Polls `operation` until it is done.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error if it finished unsuccessfully,
    /// `OperationTimeout` once the maximum wait is exceeded, `Cancelled` if
    /// the token fires, or the first non-transient polling error.
    pub async fn wait_operation(&self, operation: &str) -> Result<()> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let status = self
                .retry_within(started, operation, || self.client.poll_operation(operation))
                .await?;
            polls += 1;

            if status.done {
                debug!(operation, polls, "Operation finished");
                return match status.error {
                    Some(fault) => Err(fault.into_error()),
                    None => Ok(()),
                };
            }

            if polls % PROGRESS_EVERY == 0 {
                info!(operation, polls, "Still waiting for operation");
            } else {
                debug!(operation, polls, "Operation pending");
            }

            self.pause(started, operation, "running", self.policy.interval).await?;
        }
    }

    /// Polls `read` until the resource no longer exists.
    ///
    /// # Errors
    ///
    /// Returns `OperationTimeout` if the resource is still present after the
    /// maximum wait, `Cancelled` if the token fires, or the first
    /// non-transient read error.
    pub async fn wait_gone(&self, resource: &ResourceRef) -> Result<()> {
        let started = Instant::now();
        let condition = format!("removal of {}", resource.remote_id);

        loop {
            let current = self
                .retry_within(started, &condition, || self.client.read(resource))
                .await?;
            if current.is_none() {
                debug!(remote_id = %resource.remote_id, "Resource is gone");
                return Ok(());
            }

            self.pause(started, &condition, "still exists", self.policy.interval).await?;
        }
    }

    /// Retries transient failures of `call` with backoff, without outliving
    /// the maximum wait or the cancellation token.
    async fn retry_within<T, F, Fut>(&self, started: Instant, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = Backoff::new(self.retry);

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(e);
                    };
                    warn!(
                        operation,
                        attempt = backoff.failures(),
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Poll failed, retrying"
                    );
                    self.pause(started, operation, &format!("unreachable: {e}"), delay)
                        .await?;
                }
            }
        }
    }

    async fn pause(&self, started: Instant, operation: &str, last_status: &str, delay: Duration) -> Result<()> {
        let elapsed = started.elapsed();
        let remaining = self.policy.max_wait.saturating_sub(elapsed);

        if remaining.is_zero() {
            return Err(RemoteError::OperationTimeout {
                operation: operation.to_string(),
                waited_secs: elapsed.as_secs(),
                last_status: last_status.to_string(),
            }
            .into());
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ReconcileError::Cancelled {
                remote_id: self.remote_id.to_string(),
            }
            .into()),
            () = tokio::time::sleep(delay.min(remaining)) => Ok(()),
        }
    }
}

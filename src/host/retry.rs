// src/host/retry.rs

//! Bounded retry with exponential backoff for host communication.

use std::future::Future;
use std::time::Duration;

use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

use crate::config::RunOptions;
use crate::errors::{Result, WoomError};

/// How host calls are retried.
///
/// Each attempt is bounded by `timeout`; a timed out attempt counts as a
/// transient failure. Configuration and template errors are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_run_options(&RunOptions::default())
    }
}

impl RetryPolicy {
    pub fn from_run_options(run: &RunOptions) -> Self {
        Self {
            attempts: run.retry_attempts.max(1),
            initial_delay: run.retry_initial_delay,
            max_delay: run.retry_max_delay,
            timeout: run.host_timeout,
        }
    }

    /// A single attempt, no backoff.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            timeout,
        }
    }

    fn strategy(&self) -> impl Iterator<Item = Duration> {
        // Delays are 2^n * factor ms, so the first one is `initial_delay`.
        let factor = (self.initial_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay_millis(self.max_delay.as_millis() as u64)
            .take(self.attempts.saturating_sub(1))
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub async fn call<T, F, Fut>(&self, host: &str, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        let (notify_host, notify_what) = (host.to_owned(), what.to_owned());
        Retry::spawn_notify(
            self.strategy(),
            || {
                let attempt = op();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) if is_transient(&e) => Err(RetryError::transient(e)),
                        Ok(Err(e)) => Err(RetryError::permanent(e)),
                        Err(_) => Err(RetryError::transient(WoomError::host(
                            host,
                            format!("{what} timed out after {timeout:?}"),
                        ))),
                    }
                }
            },
            move |e: &WoomError, next: Duration| {
                let (host, what) = (notify_host.as_str(), notify_what.as_str());
                warn!(host, error = %e, retry_in = ?next, "{what} failed; retrying");
            },
        )
        .await
    }
}

fn is_transient(err: &WoomError) -> bool {
    matches!(
        err,
        WoomError::HostCommunication { .. } | WoomError::Io(_) | WoomError::Other(_)
    )
}

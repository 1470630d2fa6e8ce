//! Condition polling with a deadline.
//!
//! [`wait_for`] repeatedly evaluates an async condition until it holds, the
//! deadline passes, or the condition reports an error the [`PollPolicy`]
//! refuses to swallow.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Outcome of a single condition check that did not succeed.
#[derive(Debug)]
pub enum CondCheckError<E> {
    /// The condition does not hold yet; keep waiting.
    NotYet,
    /// The check itself failed.
    Failed(E),
}

impl<E> From<E> for CondCheckError<E> {
    fn from(value: E) -> Self {
        Self::Failed(value)
    }
}

/// How an error reported by a condition affects polling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Temporary failure; keep polling.
    Transient,
    /// The remote API rejected the request; see [`PollPolicy`].
    Client,
    /// Polling cannot succeed any more.
    Fatal,
}

/// Classifies errors raised while polling.
pub trait Retryable {
    /// Returns how polling should react to this error.
    fn retry_class(&self) -> RetryClass;
}

/// Treatment of client errors raised while polling.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PollPolicy {
    /// Swallow client errors and keep polling until the deadline.
    #[default]
    RetryAll,
    /// Abort polling on the first client error.
    AbortOnClientError,
}

impl PollPolicy {
    /// Returns `true` when an error of `class` stops polling.
    #[must_use]
    pub const fn aborts_on(self, class: RetryClass) -> bool {
        match class {
            RetryClass::Transient => false,
            RetryClass::Fatal => true,
            RetryClass::Client => matches!(self, Self::AbortOnClientError),
        }
    }
}

/// Reasons [`wait_for`] gave up.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The deadline passed before the condition held.
    #[error("condition not met after {waited:?}")]
    Timeout {
        /// Time spent polling.
        waited: Duration,
        /// Rendering of the last error swallowed while polling.
        last_error: Option<String>,
    },
    /// The condition reported an error the policy does not swallow.
    #[error("polling aborted: {0}")]
    Aborted(E),
}

/// Polls `condition` until it succeeds or `deadline` passes, returning the
/// value of the successful check.
///
/// The first check runs immediately; later checks run every `interval`,
/// with the final sleep shortened so the last check lands on the deadline.
///
/// # Errors
///
/// Returns [`WaitError::Timeout`] once the deadline has passed without the
/// condition holding, and [`WaitError::Aborted`] when the condition fails
/// with an error that `policy` does not swallow.
pub async fn wait_for<T, E, F, Fut>(
    deadline: Instant,
    interval: Duration,
    policy: PollPolicy,
    mut condition: F,
) -> Result<T, WaitError<E>>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError<E>>>,
{
    let started = Instant::now();
    let mut last_error = None;

    loop {
        match condition().await {
            Ok(value) => return Ok(value),
            Err(CondCheckError::NotYet) => {}
            Err(CondCheckError::Failed(err)) => {
                if policy.aborts_on(err.retry_class()) {
                    return Err(WaitError::Aborted(err));
                }
                debug!(error = %err, "condition check failed; still polling");
                last_error = Some(err.to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout {
                waited: now.saturating_duration_since(started),
                last_error,
            });
        }
        sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests;

//! Bounded retries with linear backoff.
//!
//! After the n-th failed attempt the executor waits `base_delay * n` before
//! the next one. Attempts are strictly sequential. Only retryable transport
//! errors (timeouts, network errors, 429 and 5xx) consume further attempts;
//! anything else is returned immediately.

use crate::errors::{ReconflowError, TransportError};
use crate::utils::duration_ms;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Immutable retry parameters for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Base of the linear backoff.
    pub base_delay: Duration,
    /// Deadline applied to each attempt on top of the transport's own.
    pub timeout_per_attempt: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout_per_attempt: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy without a per-attempt deadline.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout_per_attempt: None,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_timeout_per_attempt(mut self, timeout: Duration) -> Self {
        self.timeout_per_attempt = Some(timeout);
        self
    }

    /// Delay after the given failed attempt (1-based): `base_delay * attempt`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Decides what to do after `attempt` (1-based) failed with `error`.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &TransportError) -> RetryDecision {
        if !error.is_retryable() {
            RetryDecision::NotRetryable
        } else if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.delay_for_attempt(attempt))
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Executes a transport operation under a retry policy.
///
/// Returns the first success, the first non-retryable error unwrapped, or
/// [`ReconflowError::RetryExhausted`] carrying the last error once all
/// attempts failed.
///
/// # Errors
///
/// See above.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, ReconflowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = match policy.timeout_per_attempt {
            Some(deadline) => match tokio::time::timeout(deadline, operation()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::timeout(deadline)),
            },
            None => operation().await,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match policy.decide(attempt, &error) {
            RetryDecision::Retry(delay) => {
                tracing::debug!(
                    operation = label,
                    attempt,
                    delay_ms = duration_ms(delay),
                    error = %error,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => {
                tracing::warn!(
                    operation = label,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(ReconflowError::RetryExhausted {
                    attempts: attempt as usize,
                    last_error: error,
                });
            }
            RetryDecision::NotRetryable => return Err(error.into()),
        }
    }
}

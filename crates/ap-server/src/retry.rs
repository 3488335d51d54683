//! Retry helpers
//!
//! Two distinct loops live here:
//!
//! - [`RetryPolicy`] wraps a single external call with per-attempt timeouts and
//!   exponential backoff, retrying only transient transport failures.
//! - [`retry_on_conflict`] repeats an optimistic write that reports a version
//!   conflict as `Ok(false)`, with linear backoff between attempts.
//!
//! Neither is related to an event's `retry_count`, which counts terminal
//! failures across processing passes.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Attempts made by [`retry_on_conflict`] callers in the processor
pub const CONFLICT_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff step between conflict retries
pub const CONFLICT_RETRY_STEP: Duration = Duration::from_millis(100);

/// Failure of one call to an external system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalCallError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Timeout raised by the HTTP client itself rather than by the policy
    #[error("request timed out in the HTTP client: {0}")]
    ClientTimeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("call cancelled")]
    Cancelled,
}

impl ExternalCallError {
    /// Network and timeout failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ClientTimeout(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for ExternalCallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ClientTimeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Rejected {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Bounded retry with exponential backoff for one external call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff_base^n` seconds
    pub backoff_base: f64,
    /// Upper bound on a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.backoff_base.powi(exponent).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Longest a single [`run`](Self::run) can take: every attempt hitting
    /// its timeout plus every backoff sleep in between
    pub fn worst_case_duration(&self) -> Duration {
        let max_attempts = self.max_attempts.max(1);
        (1..max_attempts).fold(
            self.attempt_timeout.saturating_mul(max_attempts),
            |total, attempt| total.saturating_add(self.delay_for(attempt)),
        )
    }

    /// Run `call` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires. `call` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ExternalCallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExternalCallError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExternalCallError::Cancelled),
                result = tokio::time::timeout(self.attempt_timeout, call(attempt)) => {
                    result.unwrap_or(Err(ExternalCallError::Timeout(self.attempt_timeout)))
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "External call failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ExternalCallError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }
}

/// Repeat an optimistic write until it lands or attempts run out.
///
/// `op` returns `Ok(true)` when the write was applied and `Ok(false)` on a
/// version conflict; it is expected to reload state itself before writing.
/// Returns `Ok(false)` if every attempt conflicted.
pub async fn retry_on_conflict<F, Fut, E>(
    max_attempts: u32,
    step: Duration,
    mut op: F,
) -> Result<bool, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if op(attempt).await? {
            return Ok(true);
        }

        if attempt < max_attempts {
            tokio::time::sleep(step * attempt).await;
        }
    }

    Ok(false)
}

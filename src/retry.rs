//! Retry driver with fixed or exponential backoff
//!
//! A task attempt is a full state-machine run with a fresh browser session. This module
//! wraps such a run in an outer loop whose attempt budget and backoff policy are plain
//! constructor parameters ([`RetryPolicy`]), so the loop state never leaks into the
//! attempt itself.
//!
//! # Example
//!
//! ```no_run
//! use webvideo_dl::retry::{IsRetryable, Interrupted, RetryPolicy, run_with_retry};
//! use tokio_util::sync::CancellationToken;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Stopped,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! impl From<Interrupted> for MyError {
//!     fn from(_: Interrupted) -> Self {
//!         MyError::Stopped
//!     }
//! }
//!
//! # async fn example() {
//! let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
//! let cancel = CancellationToken::new();
//! let outcome = run_with_retry(&policy, &cancel, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! assert_eq!(outcome.attempts, 1);
//! # }
//! ```

use crate::config::{BackoffStrategy, Config};
use crate::error::TaskError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if another attempt may succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TaskError {
    fn is_retryable(&self) -> bool {
        match self {
            // A malformed URL fails identically every time
            TaskError::InvalidUrl(_) => false,
            TaskError::Cancelled => false,
            TaskError::NavigationTimeout(_)
            | TaskError::LoginFailure(_)
            | TaskError::SelectorNotFound(_)
            | TaskError::ExtractionFailure(_)
            | TaskError::ConcurrencyLeaseTimeout(_)
            | TaskError::SessionFailure(_) => true,
        }
    }
}

/// Marker produced when the retry loop is stopped by its cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Attempt budget and backoff between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// How the delay grows between attempts
    pub backoff: BackoffStrategy,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay (before jitter)
    pub max_delay: Duration,
    /// Growth factor for exponential backoff
    pub multiplier: f64,
    /// Stretch each delay by a random factor in [1, 2]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Build the policy from the global config
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            backoff: config.retry.backoff,
            initial_delay: config.retry.initial_delay,
            max_delay: config.retry.max_delay,
            multiplier: config.retry.backoff_multiplier,
            jitter: config.retry.jitter,
        }
    }

    /// Fixed delay between attempts, no jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Fixed,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Exponential delay between attempts, no jitter
    pub fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Exponential,
            initial_delay,
            max_delay,
            multiplier,
            jitter: false,
        }
    }

    /// Base delay before retry number `retry` (1 = delay after the first failure)
    pub fn base_delay(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Exponential => {
                let exponent = retry.saturating_sub(1).min(63) as i32;
                let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
                if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
                    self.max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter { add_jitter(base) } else { base }
    }
}

/// Final result of a retried operation together with the number of attempts made
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The successful value or the last error observed
    pub result: Result<T, E>,
    /// Attempts actually started (never exceeds `max_attempts`)
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently or the attempt budget is spent
///
/// `operation` receives the 1-based attempt number. The backoff sleep between attempts
/// is cancellable; a cancelled token yields `E::from(Interrupted)`.
pub async fn run_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display + From<Interrupted>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(E::from(Interrupted)),
                attempts: attempt,
            };
        }

        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay(attempt);

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        return RetryOutcome {
                            result: Err(E::from(Interrupted)),
                            attempts: attempt,
                        };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, attempts = attempt, "Operation stopped with non-retryable error");
                }
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

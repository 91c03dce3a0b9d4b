//! Cancellable waiting primitives used by the navigator

use crate::browser::BrowserSession;
use crate::error::{BrowserError, TaskError};
use crate::utils::random_duration;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Run `fut` unless `cancel` fires first
pub(crate) async fn suspend<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, TaskError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Sleep for a random human-like pause, aborting on cancellation
pub(crate) async fn pause(
    cancel: &CancellationToken,
    min: Duration,
    max: Duration,
) -> Result<(), TaskError> {
    let delay = random_duration(min, max);
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        };
    }
    suspend(cancel, tokio::time::sleep(delay)).await
}

/// Probe `selectors` in declared order each round until one matches
///
/// Returns the first matching selector, or `None` once `timeout` has elapsed
/// without a match. A crashed session aborts the search with
/// [`TaskError::SessionFailure`]; other probe errors count as "no match".
pub(crate) async fn first_match(
    session: &dyn BrowserSession,
    selectors: &[String],
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<String>, TaskError> {
    let deadline = Instant::now() + timeout;

    loop {
        for selector in selectors {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            match suspend(cancel, session.element_exists(selector)).await? {
                Ok(true) => return Ok(Some(selector.clone())),
                Ok(false) => {}
                Err(BrowserError::Crashed(message)) => {
                    return Err(TaskError::SessionFailure(message));
                }
                Err(e) => tracing::debug!(selector = %selector, error = %e, "selector probe failed"),
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        let wait = poll_interval.min(deadline - now);
        suspend(cancel, tokio::time::sleep(wait)).await?;
    }
}

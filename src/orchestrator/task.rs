//! Per-task retry loop and per-attempt resource handling.

use crate::error::TaskError;
use crate::navigator::{Attempt, NavigationRun};
use crate::profiles::SiteProfile;
use crate::retry::run_with_retry;
use crate::types::{Event, ResultRecord, TaskId, TaskOutcome};
use chrono::Utc;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::DownloadOrchestrator;

impl DownloadOrchestrator {
    /// Drive one task to its terminal outcome
    ///
    /// Always produces a record, hands it to the history recorder and emits
    /// [`Event::TaskFinished`].
    pub(crate) async fn run_task(
        &self,
        id: TaskId,
        url: String,
        cancel: CancellationToken,
    ) -> ResultRecord {
        let started_at = Utc::now();

        let (host, result, attempts) = match self.profiles.resolve_url(&url) {
            None => {
                tracing::warn!(task_id = id.get(), url = %url, "rejecting URL without a host");
                (
                    String::new(),
                    Err(TaskError::InvalidUrl(url.clone())),
                    0,
                )
            }
            Some((host, profile)) => {
                if profile.is_default() {
                    tracing::debug!(task_id = id.get(), host = %host, "no site profile, using default");
                }
                let outcome = {
                    let (url, host, profile, cancel) = (url.as_str(), host.as_str(), &*profile, &cancel);
                    run_with_retry(&self.retry, cancel, move |attempt| {
                        self.run_attempt(id, url, host, profile, cancel, attempt)
                    })
                    .await
                };
                (host, outcome.result, outcome.attempts)
            }
        };

        let record = ResultRecord {
            id,
            url,
            host,
            outcome: TaskOutcome::from_result(result),
            attempts,
            started_at,
            finished_at: Utc::now(),
        };

        match &record.outcome {
            TaskOutcome::Done { path } => tracing::info!(
                task_id = id.get(),
                url = %record.url,
                path = %path.display(),
                attempts,
                "download finished"
            ),
            TaskOutcome::Failed { kind, message } => tracing::error!(
                task_id = id.get(),
                url = %record.url,
                kind = %kind,
                error = %message,
                attempts,
                "download failed"
            ),
            TaskOutcome::Cancelled => {
                tracing::info!(task_id = id.get(), url = %record.url, "download cancelled")
            }
        }

        if let Err(e) = self.history.record(&record).await {
            tracing::error!(
                task_id = id.get(),
                history = self.history.name(),
                error = %e,
                "failed to record history"
            );
        }

        self.tasks.active.lock().await.remove(&id);
        self.emit_event(Event::TaskFinished {
            record: record.clone(),
        });
        record
    }

    /// One attempt: lease a session, take a hold, navigate, give both back
    async fn run_attempt(
        &self,
        id: TaskId,
        url: &str,
        host: &str,
        profile: &SiteProfile,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<PathBuf, TaskError> {
        tracing::debug!(task_id = id.get(), attempt, "attempt started");
        self.emit_event(Event::AttemptStarted { id, attempt });

        let result = self
            .navigate_with_resources(id, url, host, profile, cancel)
            .await;

        if let Err(e) = &result
            && let Some(kind) = e.kind()
        {
            tracing::warn!(task_id = id.get(), attempt, kind = %kind, error = %e, "attempt failed");
            self.emit_event(Event::AttemptFailed {
                id,
                attempt,
                kind,
                error: e.to_string(),
            });
        }
        result
    }

    async fn navigate_with_resources(
        &self,
        id: TaskId,
        url: &str,
        host: &str,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TaskError> {
        let mut session = self.pool.acquire(cancel).await?;

        let hold = match self.identity.acquire_hold(cancel).await {
            Ok(hold) => hold,
            Err(e) => {
                self.pool.release(session).await;
                return Err(e);
            }
        };
        tracing::debug!(
            task_id = id.get(),
            session_id = session.id(),
            epoch = hold.epoch(),
            "session and identity hold acquired"
        );

        let run = match session.browser() {
            Ok(browser) => {
                let attempt = Attempt {
                    task_id: id,
                    url,
                    host,
                    profile,
                    cancel,
                };
                self.navigator.run(attempt, browser).await
            }
            Err(e) => NavigationRun {
                stages: Vec::new(),
                result: Err(e),
            },
        };

        drop(hold);
        if !run.session_reusable() {
            session.mark_unrecoverable();
        }
        self.pool.release(session).await;

        run.result
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use crate::error::{ExtractionError, FailureKind};
    use crate::orchestrator::{Collaborators, DownloadOrchestrator};
    use crate::testing::fixtures::fast_config;
    use crate::testing::{MemoryHistory, MockBrowserDriver, MockExtractor, PageScript};
    use crate::types::{Event, TaskOutcome};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn playable() -> PageScript {
        PageScript::new()
            .element(".play")
            .reveal_on_click(".play", "video source")
            .media("video source", "https://cdn.example.com/v.mp4")
    }

    #[tokio::test(start_paused = true)]
    async fn extraction_failure_is_retried_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let extractor = MockExtractor::new();
        extractor
            .set_next_error(ExtractionError::Failed("HTTP 503".into()))
            .await;
        let orchestrator = DownloadOrchestrator::new(
            fast_config(dir.path()),
            Collaborators::new(
                Arc::new(MockBrowserDriver::with_script(playable())),
                Arc::new(extractor.clone()),
            ),
        )
        .await
        .unwrap();
        let mut events = orchestrator.subscribe();

        let records = orchestrator
            .submit(vec!["https://example.com/v/1"])
            .await
            .unwrap();
        assert!(records[0].success());
        assert_eq!(records[0].attempts, 2);
        assert_eq!(extractor.extraction_count().await, 2);

        let mut failed_attempts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Event::AttemptFailed { attempt, kind, .. } = event {
                failed_attempts.push((attempt, kind));
            }
        }
        assert_eq!(failed_attempts, vec![(1, FailureKind::ExtractionFailure)]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let driver = MockBrowserDriver::with_script(playable());
        let history = MemoryHistory::new();
        let orchestrator = DownloadOrchestrator::new(
            fast_config(dir.path()),
            Collaborators::new(Arc::new(driver.clone()), Arc::new(MockExtractor::new()))
                .with_history(Arc::new(history.clone())),
        )
        .await
        .unwrap();

        let records = orchestrator.submit(vec!["not a url"]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_kind(), Some(FailureKind::InvalidUrl));
        assert_eq!(records[0].attempts, 0);
        assert_eq!(driver.launch_count(), 0);
        assert_eq!(history.records().await, records);
    }

    #[tokio::test(start_paused = true)]
    async fn history_failure_does_not_change_outcome() {
        let dir = TempDir::new().unwrap();
        let history = MemoryHistory::new();
        history.set_fail(true).await;
        let orchestrator = DownloadOrchestrator::new(
            fast_config(dir.path()),
            Collaborators::new(
                Arc::new(MockBrowserDriver::with_script(playable())),
                Arc::new(MockExtractor::new()),
            )
            .with_history(Arc::new(history)),
        )
        .await
        .unwrap();

        let records = orchestrator
            .submit(vec!["https://example.com/v/1"])
            .await
            .unwrap();
        assert!(matches!(records[0].outcome, TaskOutcome::Done { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn session_failure_discards_session() {
        let dir = TempDir::new().unwrap();
        let driver = MockBrowserDriver::with_script(
            playable().navigation_error(crate::error::BrowserError::Crashed("gone".into())),
        );
        let orchestrator = DownloadOrchestrator::new(
            fast_config(dir.path()),
            Collaborators::new(Arc::new(driver.clone()), Arc::new(MockExtractor::new())),
        )
        .await
        .unwrap();

        let records = orchestrator
            .submit(vec!["https://example.com/v/1"])
            .await
            .unwrap();
        assert_eq!(records[0].failure_kind(), Some(FailureKind::SessionFailure));
        assert_eq!(records[0].attempts, 3);
        // every attempt got a fresh context and none is left open
        assert_eq!(driver.launch_count(), 3);
        assert_eq!(driver.open_sessions(), 0);
    }
}

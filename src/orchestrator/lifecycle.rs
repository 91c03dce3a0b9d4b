//! Cancellation and graceful shutdown.

use crate::error::Result;
use crate::types::{Event, TaskId};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::DownloadOrchestrator;

/// How long shutdown waits for cancelled tasks to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl DownloadOrchestrator {
    /// Cancel one task
    ///
    /// The task stops at its next wait point, gives its hold and session back
    /// and finishes as `Cancelled`. Returns `false` when the task is unknown or
    /// already finished.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let active = self.tasks.active.lock().await;
        match active.get(&id) {
            Some(token) => {
                tracing::info!(task_id = id.get(), "cancelling task");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of tasks that have not finished yet
    pub async fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.active.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Whether new batches are admitted
    pub fn is_accepting(&self) -> bool {
        self.tasks.accepting_new.load(Ordering::SeqCst)
    }

    /// Gracefully shut down the orchestrator
    ///
    /// 1. Stops admitting new batches
    /// 2. Cancels every outstanding task
    /// 3. Waits up to 30 seconds for them to record their outcome
    /// 4. Stops the identity scheduler (disconnecting the VPN if configured)
    /// 5. Closes the browser session pool
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.tasks.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");

        let outstanding = self.tasks.active.lock().await.len();
        self.tasks.shutdown_token.cancel();
        tracing::info!(outstanding, "Signaled cancellation to all active tasks");

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_tasks()).await {
            Ok(()) => tracing::info!("All active tasks finished"),
            Err(_) => {
                tracing::warn!("Timeout waiting for tasks to finish, proceeding with shutdown")
            }
        }

        self.identity.stop().await;
        self.pool.close().await;

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_tasks(&self) {
        loop {
            let active_count = self.tasks.active.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active tasks to finish");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::orchestrator::{Collaborators, DownloadOrchestrator};
    use crate::testing::fixtures::fast_config;
    use crate::testing::{MockBrowserDriver, MockExtractor, MockVpnControl, PageScript};
    use crate::types::{Event, IdentityPhase, TaskId};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_new_batches() {
        let dir = TempDir::new().unwrap();
        let orchestrator = DownloadOrchestrator::new(
            fast_config(dir.path()),
            Collaborators::new(
                Arc::new(MockBrowserDriver::new()),
                Arc::new(MockExtractor::new()),
            ),
        )
        .await
        .unwrap();
        let mut events = orchestrator.subscribe();

        orchestrator.shutdown().await.unwrap();
        assert!(!orchestrator.is_accepting());

        let err = orchestrator
            .submit(vec!["https://example.com/v/1"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
        assert!(matches!(events.try_recv(), Ok(Event::Shutdown)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_running_tasks_and_stops_rotation() {
        let dir = TempDir::new().unwrap();
        let mut config = fast_config(dir.path());
        config.nordvpn_enabled = true;
        let driver = MockBrowserDriver::with_script(PageScript::new());
        let vpn = MockVpnControl::new();
        let orchestrator = DownloadOrchestrator::new(
            config,
            Collaborators::new(Arc::new(driver.clone()), Arc::new(MockExtractor::new()))
                .with_vpn(Arc::new(vpn.clone())),
        )
        .await
        .unwrap();
        assert_eq!(orchestrator.identity_snapshot().phase, IdentityPhase::Scheduled);

        // no control ever appears, so the task keeps polling until cancelled
        let batch = orchestrator
            .admit(vec!["https://example.com/v/1"])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(orchestrator.active_tasks().await, vec![TaskId(1)]);

        orchestrator.shutdown().await.unwrap();
        let records = batch.join().await;
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].outcome, crate::types::TaskOutcome::Cancelled));
        assert_eq!(orchestrator.identity_snapshot().phase, IdentityPhase::Idle);
        assert_eq!(vpn.disconnect_count(), 1);
        assert_eq!(driver.open_sessions(), 0);
    }

    #[tokio::test]
    async fn cancelling_unknown_task_returns_false() {
        let dir = TempDir::new().unwrap();
        let orchestrator = DownloadOrchestrator::new(
            fast_config(dir.path()),
            Collaborators::new(
                Arc::new(MockBrowserDriver::new()),
                Arc::new(MockExtractor::new()),
            ),
        )
        .await
        .unwrap();
        assert!(!orchestrator.cancel(TaskId(42)).await);
    }
}

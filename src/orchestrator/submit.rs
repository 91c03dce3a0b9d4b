//! Batch admission and result collection.

use crate::error::{Error, FailureKind, Result};
use crate::types::{Event, ResultRecord, TaskId, TaskOutcome};
use crate::utils::host_of;
use chrono::Utc;
use std::sync::atomic::Ordering;
use tokio::task::JoinHandle;

use super::DownloadOrchestrator;

struct Admitted {
    id: TaskId,
    url: String,
    handle: JoinHandle<ResultRecord>,
}

/// Tasks admitted together
///
/// Dropping a `Batch` does not stop its tasks; use
/// [`DownloadOrchestrator::cancel`] for that.
pub struct Batch {
    tasks: Vec<Admitted>,
}

impl Batch {
    /// Ids of the admitted tasks, in submission order
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    /// Number of tasks in the batch
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task and return one record per task, sorted by id
    pub async fn join(self) -> Vec<ResultRecord> {
        let started_at = Utc::now();
        let (meta, handles): (Vec<_>, Vec<_>) = self
            .tasks
            .into_iter()
            .map(|t| ((t.id, t.url), t.handle))
            .unzip();

        let joined = futures::future::join_all(handles).await;

        let mut records: Vec<ResultRecord> = meta
            .into_iter()
            .zip(joined)
            .map(|((id, url), joined)| match joined {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(task_id = id.get(), error = %e, "download task aborted");
                    let outcome = if e.is_cancelled() {
                        TaskOutcome::Cancelled
                    } else {
                        TaskOutcome::Failed {
                            kind: FailureKind::SessionFailure,
                            message: format!("task panicked: {}", e),
                        }
                    };
                    ResultRecord {
                        id,
                        host: host_of(&url).unwrap_or_default(),
                        url,
                        outcome,
                        attempts: 0,
                        started_at,
                        finished_at: Utc::now(),
                    }
                }
            })
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

impl DownloadOrchestrator {
    /// Admit `urls` as tasks and start them immediately
    ///
    /// Returns as soon as every task is spawned. Tasks compete for browser
    /// sessions, so at most `concurrent_downloads` of them navigate at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has started.
    pub async fn admit<I, S>(&self, urls: I) -> Result<Batch>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.tasks.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let mut tasks = Vec::new();
        for url in urls {
            let url: String = url.into();
            let id = TaskId(self.tasks.next_id.fetch_add(1, Ordering::SeqCst));
            let cancel = self.tasks.shutdown_token.child_token();
            self.tasks.active.lock().await.insert(id, cancel.clone());

            tracing::info!(task_id = id.get(), url = %url, "task admitted");
            self.emit_event(Event::TaskAdmitted {
                id,
                url: url.clone(),
            });

            let orchestrator = self.clone();
            let task_url = url.clone();
            let handle =
                tokio::spawn(async move { orchestrator.run_task(id, task_url, cancel).await });
            tasks.push(Admitted { id, url, handle });
        }

        Ok(Batch { tasks })
    }

    /// Run `urls` to completion and return one record per URL, sorted by task id
    ///
    /// Individual failures never fail the batch; they are reported in the
    /// records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has started.
    pub async fn submit<I, S>(&self, urls: I) -> Result<Vec<ResultRecord>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let batch = self.admit(urls).await?;
        Ok(batch.join().await)
    }
}

//! Download history sinks
//!
//! Every finished task produces exactly one [`ResultRecord`], handed to a
//! [`HistoryRecorder`]. Recorder failures are logged by the orchestrator and
//! never change a task's outcome.

use crate::error::Result;
use crate::types::ResultRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Receives the terminal record of every task
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    /// Persist one record
    async fn record(&self, record: &ResultRecord) -> Result<()>;

    /// Name of the implementation for logging
    fn name(&self) -> &'static str;
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHistory;

#[async_trait]
impl HistoryRecorder for NoOpHistory {
    async fn record(&self, _record: &ResultRecord) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesHistory {
    path: PathBuf,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesHistory {
    /// Append to `path`, creating it (and its parent directory) on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File the records are written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, skipping lines that fail to parse
    pub async fn load(&self) -> Result<Vec<ResultRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(line = index + 1, error = %e, "skipping malformed history line")
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl HistoryRecorder for JsonLinesHistory {
    async fn record(&self, record: &ResultRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::types::{TaskId, TaskOutcome};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: u64, outcome: TaskOutcome) -> ResultRecord {
        let now = Utc::now();
        ResultRecord {
            id: TaskId(id),
            url: format!("https://example.com/v/{id}"),
            host: "example.com".into(),
            outcome,
            attempts: 1,
            started_at: now,
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn records_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let history = JsonLinesHistory::new(dir.path().join("nested").join("history.jsonl"));

        let done = record(
            1,
            TaskOutcome::Done {
                path: PathBuf::from("/downloads/a.mp4"),
            },
        );
        let failed = record(
            2,
            TaskOutcome::Failed {
                kind: FailureKind::SelectorNotFound,
                message: "no selector matched".into(),
            },
        );
        history.record(&done).await.unwrap();
        history.record(&failed).await.unwrap();

        let loaded = history.load().await.unwrap();
        assert_eq!(loaded, vec![done, failed]);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let history = JsonLinesHistory::new(dir.path().join("none.jsonl"));
        assert!(history.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = JsonLinesHistory::new(&path);
        history.record(&record(1, TaskOutcome::Cancelled)).await.unwrap();
        tokio::fs::write(
            &path,
            format!("{}not json\n", tokio::fs::read_to_string(&path).await.unwrap()),
        )
        .await
        .unwrap();

        assert_eq!(history.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let history = Arc::new(JsonLinesHistory::new(dir.path().join("history.jsonl")));

        let mut handles = Vec::new();
        for id in 0..20 {
            let history = Arc::clone(&history);
            handles.push(tokio::spawn(async move {
                history.record(&record(id, TaskOutcome::Cancelled)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(history.load().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn noop_accepts_everything() {
        NoOpHistory
            .record(&record(1, TaskOutcome::Cancelled))
            .await
            .unwrap();
    }
}

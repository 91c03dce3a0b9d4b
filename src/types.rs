//! Core types for webvideo-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FailureKind, TaskError};

/// Unique identifier for a download task
///
/// Ids are assigned in admission order and are unique for the lifetime of an
/// orchestrator. Batch results are returned sorted by this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named states of the per-attempt navigation state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavStage {
    /// Nothing loaded yet
    Init,
    /// Task URL loaded in the session
    Navigated,
    /// Login form being filled and submitted
    LoginPending,
    /// Login accepted
    LoggedIn,
    /// A play control matched
    ControlLocated,
    /// The media URL is known
    MediaResolved,
    /// Extraction produced a file
    Done,
    /// The attempt failed
    Failed,
}

impl NavStage {
    /// True while the page is half-driven and the session may hold stale state
    pub fn is_mid_navigation(&self) -> bool {
        !matches!(self, NavStage::Init | NavStage::Done | NavStage::Failed)
    }
}

/// Terminal outcome of a download task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Media extracted to `path`
    Done {
        /// Extracted file
        path: PathBuf,
    },
    /// All attempts failed; carries the last observed reason
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },
    /// The task was cancelled before finishing
    Cancelled,
}

impl TaskOutcome {
    /// Convert the final attempt result into an outcome
    pub fn from_result(result: Result<PathBuf, TaskError>) -> Self {
        match result {
            Ok(path) => TaskOutcome::Done { path },
            Err(TaskError::Cancelled) => TaskOutcome::Cancelled,
            Err(e) => TaskOutcome::Failed {
                // kind() is only None for Cancelled, handled above
                kind: e.kind().unwrap_or(FailureKind::SessionFailure),
                message: e.to_string(),
            },
        }
    }
}

/// Result of one download task, handed to the history recorder exactly once
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Task identifier
    pub id: TaskId,
    /// Submitted URL
    pub url: String,
    /// Host the site profile was resolved for (empty when the URL was invalid)
    pub host: String,
    /// Terminal outcome
    pub outcome: TaskOutcome,
    /// Attempts started for this task
    pub attempts: u32,
    /// When the task was admitted
    pub started_at: DateTime<Utc>,
    /// When the outcome was finalized
    pub finished_at: DateTime<Utc>,
}

impl ResultRecord {
    /// True if the task produced a file
    pub fn success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Done { .. })
    }

    /// Extracted file, only for successful tasks
    pub fn file_path(&self) -> Option<&Path> {
        match &self.outcome {
            TaskOutcome::Done { path } => Some(path.as_path()),
            _ => None,
        }
    }

    /// Failure classification, only for failed tasks
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            TaskOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Wall-clock duration of the task in seconds
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Aggregate statistics of a batch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Records in the batch
    pub processed: usize,
    /// Tasks that produced a file
    pub succeeded: usize,
    /// Tasks that ended `Failed`
    pub failed: usize,
    /// Tasks that ended `Cancelled`
    pub cancelled: usize,
    /// Sum of per-task durations in seconds
    pub total_secs: f64,
}

impl BatchSummary {
    /// Summarize a set of records
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut summary = Self {
            processed: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.outcome {
                TaskOutcome::Done { .. } => summary.succeeded += 1,
                TaskOutcome::Failed { .. } => summary.failed += 1,
                TaskOutcome::Cancelled => summary.cancelled += 1,
            }
            summary.total_secs += record.elapsed_secs();
        }
        summary
    }

    /// Process exit code for a command-line front end: 0 only if every task succeeded
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.cancelled == 0 { 0 } else { 1 }
    }

    /// Share of successful tasks in percent (0 for an empty batch)
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.processed as f64 * 100.0
        }
    }
}

/// Phase of the network identity scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPhase {
    /// Not started or stopped
    Idle,
    /// Waiting for the next deadline (or for holds to clear)
    Scheduled,
    /// The VPN collaborator is changing the identity
    RotationInFlight,
}

/// Events emitted by the orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A URL was admitted as a task
    TaskAdmitted {
        /// Task ID
        id: TaskId,
        /// Submitted URL
        url: String,
    },

    /// An attempt started with a fresh session
    AttemptStarted {
        /// Task ID
        id: TaskId,
        /// 1-based attempt number
        attempt: u32,
    },

    /// The navigator entered a new stage
    StageChanged {
        /// Task ID
        id: TaskId,
        /// New stage
        stage: NavStage,
    },

    /// An attempt failed (the task may still be retried)
    AttemptFailed {
        /// Task ID
        id: TaskId,
        /// 1-based attempt number
        attempt: u32,
        /// Failure classification
        kind: FailureKind,
        /// Error message
        error: String,
    },

    /// A task reached its terminal outcome
    TaskFinished {
        /// The finalized record
        record: ResultRecord,
    },

    /// The rotation deadline passed while downloads held the identity
    RotationDeferred {
        /// Outstanding holds at the deadline
        holds: usize,
    },

    /// The network identity was changed
    IdentityRotated {
        /// Epoch after the rotation
        epoch: u64,
    },

    /// The VPN collaborator failed to rotate (rescheduled)
    RotationFailed {
        /// Error message
        error: String,
    },

    /// The orchestrator shut down
    Shutdown,
}

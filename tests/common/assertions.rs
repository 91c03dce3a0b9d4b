//! Custom test assertions for integration tests

use std::time::Duration;
use tokio::sync::broadcast;
use webvideo_dl::{DownloadOrchestrator, Event, NavStage, ResultRecord, TaskId};

/// Drain every event currently buffered on `events`
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Wait until task `id` reports `stage`, or panic after `timeout`
pub async fn wait_for_stage(
    events: &mut broadcast::Receiver<Event>,
    id: TaskId,
    stage: NavStage,
    timeout: Duration,
) {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::StageChanged {
                    id: event_id,
                    stage: event_stage,
                }) if event_id == id && event_stage == stage => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    assert!(result.is_ok(), "task {id} never reached {stage:?}");
}

/// Wait until the orchestrator has no running task
pub async fn wait_until_idle(orchestrator: &DownloadOrchestrator, timeout: Duration) {
    let result = tokio::time::timeout(timeout, async {
        while !orchestrator.active_tasks().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "tasks still running after {timeout:?}");
}

/// Every record is `Done` exactly when it carries a non-empty path
pub fn assert_done_iff_path(records: &[ResultRecord]) {
    for record in records {
        let has_path = record
            .file_path()
            .is_some_and(|p| !p.as_os_str().is_empty());
        assert_eq!(
            record.success(),
            has_path,
            "record {} breaks done/path correspondence: {:?}",
            record.id,
            record.outcome
        );
    }
}

/// Records are sorted by task id with no duplicates
pub fn assert_sorted_by_id(records: &[ResultRecord]) {
    assert!(
        records.windows(2).all(|w| w[0].id < w[1].id),
        "records not strictly ordered by id"
    );
}

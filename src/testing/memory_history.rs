//! In-memory history recorder for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::history::HistoryRecorder;
use crate::types::ResultRecord;

/// History recorder that keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    records: Arc<RwLock<Vec<ResultRecord>>>,
    fail: Arc<RwLock<bool>>,
}

impl MemoryHistory {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, in the order they were written.
    pub async fn records(&self) -> Vec<ResultRecord> {
        self.records.read().await.clone()
    }

    /// Make subsequent writes fail.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl HistoryRecorder for MemoryHistory {
    async fn record(&self, record: &ResultRecord) -> Result<()> {
        if *self.fail.read().await {
            return Err(Error::Io(std::io::Error::other("mock history failure")));
        }
        self.records.write().await.push(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

//! Mock extraction engine for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::ExtractionError;
use crate::extraction::{ExtractionEngine, ExtractionRequest};
use crate::utils::safe_filename;

/// Mock implementation of the ExtractionEngine trait.
///
/// Provides controllable behavior for testing:
/// - Track extraction requests for assertions
/// - Simulate one-off or persistent failures
/// - Simulate a misbehaving extractor that reports an empty path
/// - Simulate slow downloads
///
/// By default every request succeeds with
/// `<output_dir>/<domain>_<title>-<n>.mp4`; no file is written unless
/// [`set_write_files`](Self::set_write_files) is enabled.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    /// Recorded requests.
    requests: Arc<RwLock<Vec<ExtractionRequest>>>,
    /// If set, the next extraction fails with this error.
    next_error: Arc<RwLock<Option<ExtractionError>>>,
    /// If set, every extraction fails with this error.
    persistent_error: Arc<RwLock<Option<ExtractionError>>>,
    /// Report success with an empty path.
    return_empty_path: Arc<RwLock<bool>>,
    /// Simulated download duration.
    delay: Arc<RwLock<Duration>>,
    /// Create the reported file on disk.
    write_files: Arc<AtomicBool>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    /// Create a mock whose extractions succeed instantly.
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            persistent_error: Arc::new(RwLock::new(None)),
            return_empty_path: Arc::new(RwLock::new(false)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            write_files: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get all recorded requests.
    pub async fn recorded_requests(&self) -> Vec<ExtractionRequest> {
        self.requests.read().await.clone()
    }

    /// Get the number of extractions performed.
    pub async fn extraction_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Configure the next extraction to fail with the given error.
    pub async fn set_next_error(&self, error: ExtractionError) {
        *self.next_error.write().await = Some(error);
    }

    /// Configure every extraction to fail with the given error (`None` to clear).
    pub async fn set_persistent_error(&self, error: Option<ExtractionError>) {
        *self.persistent_error.write().await = error;
    }

    /// Report success with an empty path.
    pub async fn set_return_empty_path(&self, empty: bool) {
        *self.return_empty_path.write().await = empty;
    }

    /// Make each extraction take `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Create the reported file on disk.
    pub fn set_write_files(&self, write: bool) {
        self.write_files.store(write, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionEngine for MockExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<PathBuf, ExtractionError> {
        let sequence = {
            let mut requests = self.requests.write().await;
            requests.push(request.clone());
            requests.len()
        };

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if let Some(error) = self.persistent_error.read().await.clone() {
            return Err(error);
        }
        if *self.return_empty_path.read().await {
            return Ok(PathBuf::new());
        }

        let stem = safe_filename(&request.host, request.title.as_deref());
        let path = request.output_dir.join(format!("{}-{}.mp4", stem, sequence));
        if self.write_files.load(Ordering::SeqCst) {
            tokio::fs::create_dir_all(&request.output_dir)
                .await
                .map_err(|e| ExtractionError::Failed(e.to_string()))?;
            tokio::fs::write(&path, request.media_url.as_bytes())
                .await
                .map_err(|e| ExtractionError::Failed(e.to_string()))?;
        }
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

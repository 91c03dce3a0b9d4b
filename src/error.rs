//! Error types for webvideo-dl
//!
//! Two layers of errors exist:
//! - [`Error`] is returned by library operations (configuration loading, collaborator
//!   calls, shutdown). Only [`Error::Config`] aborts startup.
//! - [`TaskError`] classifies why a single download attempt failed. Task errors are
//!   retried by the orchestrator and end up inside a [`ResultRecord`](crate::ResultRecord);
//!   they never abort sibling tasks.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for webvideo-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for webvideo-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "sites.example.com.video_button")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Browser backend error outside of a task attempt (launch, shutdown)
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    /// VPN identity rotation failed (always absorbed by the scheduler)
    #[error("VPN rotation failed: {0}")]
    VpnRotation(String),

    /// External tool execution failed (yt-dlp, nordvpn, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Operation not supported (missing binary, feature disabled, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Build a configuration error pointing at a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors raised by a [`BrowserSession`](crate::browser::BrowserSession) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrowserError {
    /// The operation did not finish in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// The browser context died or stopped responding
    #[error("session crashed: {0}")]
    Crashed(String),

    /// No element matched the selector
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Any other protocol-level failure
    #[error("{0}")]
    Protocol(String),
}

/// Errors raised by an [`ExtractionEngine`](crate::extraction::ExtractionEngine)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The extractor binary is not available
    #[error("extractor unavailable: {0}")]
    Unavailable(String),

    /// The extractor ran but reported failure
    #[error("extractor failed: {0}")]
    Failed(String),

    /// The extractor claimed success but no media file was produced
    #[error("no media file produced for {0}")]
    NoOutput(String),
}

/// Machine-readable classification of a failed task attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Page load did not complete within the navigation timeout
    NavigationTimeout,
    /// Credentials could not be submitted or the post-login marker never appeared
    LoginFailure,
    /// None of the declared selectors matched before the timeout
    SelectorNotFound,
    /// The extraction engine failed or produced no file
    ExtractionFailure,
    /// No browser session became available within the lease bound
    ConcurrencyLeaseTimeout,
    /// The leased browser session died during the attempt
    SessionFailure,
    /// The task URL could not be parsed
    InvalidUrl,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::NavigationTimeout => "navigation_timeout",
            FailureKind::LoginFailure => "login_failure",
            FailureKind::SelectorNotFound => "selector_not_found",
            FailureKind::ExtractionFailure => "extraction_failure",
            FailureKind::ConcurrencyLeaseTimeout => "concurrency_lease_timeout",
            FailureKind::SessionFailure => "session_failure",
            FailureKind::InvalidUrl => "invalid_url",
        };
        f.write_str(s)
    }
}

/// Why a single task attempt ended without producing a file
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Navigation did not complete in time
    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    /// Login could not be completed
    #[error("login failed: {0}")]
    LoginFailure(String),

    /// No selector in the declared sequence matched
    #[error("no selector matched: {0}")]
    SelectorNotFound(String),

    /// Media extraction failed
    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    /// Timed out waiting for a browser session
    #[error("no browser session available after {0:?}")]
    ConcurrencyLeaseTimeout(Duration),

    /// The browser session died mid-attempt
    #[error("browser session failed: {0}")]
    SessionFailure(String),

    /// The URL is malformed or has no host
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The task was cancelled
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    /// Failure classification, or `None` for cancellation
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            TaskError::NavigationTimeout(_) => Some(FailureKind::NavigationTimeout),
            TaskError::LoginFailure(_) => Some(FailureKind::LoginFailure),
            TaskError::SelectorNotFound(_) => Some(FailureKind::SelectorNotFound),
            TaskError::ExtractionFailure(_) => Some(FailureKind::ExtractionFailure),
            TaskError::ConcurrencyLeaseTimeout(_) => Some(FailureKind::ConcurrencyLeaseTimeout),
            TaskError::SessionFailure(_) => Some(FailureKind::SessionFailure),
            TaskError::InvalidUrl(_) => Some(FailureKind::InvalidUrl),
            TaskError::Cancelled => None,
        }
    }
}

impl From<crate::retry::Interrupted> for TaskError {
    fn from(_: crate::retry::Interrupted) -> Self {
        TaskError::Cancelled
    }
}

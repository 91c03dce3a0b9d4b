//! # webvideo-dl
//!
//! Orchestration engine for retrieving videos from sites that need an
//! interactive browser session.
//!
//! ## Design Philosophy
//!
//! webvideo-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Pluggable** - Browser, extractor, VPN and history are traits with real and mock implementations
//! - **Polite** - Human-like pauses, bounded concurrency, identity rotation only in idle windows
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## How a URL is processed
//!
//! 1. The [`SiteProfileRegistry`](profiles::SiteProfileRegistry) picks the
//!    selectors for the URL's host (or the default profile)
//! 2. An attempt leases a browser session from the
//!    [`BrowserSessionPool`](session_pool::BrowserSessionPool) and takes an
//!    identity hold from the
//!    [`NetworkIdentityScheduler`](identity::NetworkIdentityScheduler)
//! 3. The [`SiteNavigator`](navigator::SiteNavigator) loads the page, logs in
//!    if needed, clicks the play control and resolves the media URL
//! 4. The [`ExtractionEngine`](extraction::ExtractionEngine) downloads the media
//! 5. The result is recorded and the task is retried on failure
//!
//! ## Quick Start
//!
//! ```no_run
//! use webvideo_dl::{BatchSummary, Collaborators, Config, DownloadOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         concurrent_downloads: 2,
//!         nordvpn_enabled: false,
//!         ..Default::default()
//!     };
//!
//!     let orchestrator =
//!         DownloadOrchestrator::new(config.clone(), Collaborators::system(&config)).await?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let records = orchestrator
//!         .submit(vec!["https://example.com/watch/1", "https://example.com/watch/2"])
//!         .await?;
//!     let summary = BatchSummary::from_records(&records);
//!     println!("{}/{} downloaded", summary.succeeded, summary.processed);
//!
//!     orchestrator.shutdown().await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Browser automation capability
pub mod browser;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Media extraction
pub mod extraction;
/// Download history sinks
pub mod history;
/// Network identity rotation
pub mod identity;
/// Per-attempt site navigation
pub mod navigator;
/// Top-level download orchestration
pub mod orchestrator;
/// Per-site profiles
pub mod profiles;
/// Retry logic with exponential backoff
pub mod retry;
/// Bounded browser session pool
pub mod session_pool;
/// Test doubles for every collaborator
pub mod testing;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, SiteProfileConfig, VpnConfig};
pub use error::{BrowserError, Error, ExtractionError, FailureKind, Result, TaskError};
pub use orchestrator::{Batch, Collaborators, DownloadOrchestrator};
pub use types::{
    BatchSummary, Event, IdentityPhase, NavStage, ResultRecord, TaskId, TaskOutcome,
};

/// Block until the process is asked to stop, then shut the orchestrator down
///
/// In-flight tasks are cancelled and finalized as `Cancelled`, identity
/// rotation stops and every browser session is closed. On unix both SIGTERM
/// and SIGINT count; elsewhere only Ctrl+C does.
///
/// # Example
///
/// ```no_run
/// use webvideo_dl::{Collaborators, Config, DownloadOrchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let orchestrator =
///         DownloadOrchestrator::new(config.clone(), Collaborators::system(&config)).await?;
///
///     let batch = orchestrator.admit(vec!["https://example.com/watch/1"]).await?;
///     tokio::spawn(async move { batch.join().await });
///
///     // Run with automatic signal handling
///     run_with_shutdown(orchestrator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: DownloadOrchestrator) -> Result<()> {
    let signal = wait_for_signal().await;
    tracing::info!(
        signal,
        active_tasks = orchestrator.active_tasks().await.len(),
        "stop requested, cancelling downloads"
    );
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    // registration can fail in sandboxes; whichever handler exists is enough
    let listen = |kind: SignalKind, name: &'static str| match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(signal = name, error = %e, "download engine cannot watch signal");
            None
        }
    };
    let mut term = listen(SignalKind::terminate(), "SIGTERM");
    let mut int = listen(SignalKind::interrupt(), "SIGINT");

    match (term.as_mut(), int.as_mut()) {
        (Some(term), Some(int)) => tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        },
        (Some(term), None) => {
            term.recv().await;
            "SIGTERM"
        }
        (None, Some(int)) => {
            int.recv().await;
            "SIGINT"
        }
        (None, None) => wait_for_ctrl_c().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "no stop signal can be observed, downloads stop now");
    }
    "ctrl-c"
}

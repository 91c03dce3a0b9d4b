//! Download orchestration split into focused submodules.
//!
//! The `DownloadOrchestrator` struct and its methods are organized by concern:
//! - [`submit`] - Batch admission and result collection
//! - [`task`] - Per-task retry loop and per-attempt resource handling
//! - [`lifecycle`] - Cancellation and graceful shutdown
//!
//! Per attempt the orchestrator leases a browser session (the only
//! concurrency gate), takes an identity hold so no VPN rotation can start,
//! runs the [`SiteNavigator`], then gives the hold and the session back, in
//! that order.

mod lifecycle;
mod submit;
mod task;

pub use submit::Batch;

use crate::browser::BrowserDriver;
use crate::config::Config;
use crate::error::Result;
use crate::extraction::{ExtractionEngine, UnavailableExtractor, YtDlpExtractor};
use crate::history::{HistoryRecorder, JsonLinesHistory, NoOpHistory};
use crate::identity::{
    DisabledVpn, IdentitySnapshot, NetworkIdentityScheduler, NordVpnControl, PublicIpProbe,
    VpnControl,
};
use crate::navigator::{NavigatorSettings, SiteNavigator};
use crate::profiles::SiteProfileRegistry;
use crate::retry::RetryPolicy;
use crate::session_pool::BrowserSessionPool;
use crate::types::{Event, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// External capabilities the orchestrator drives
///
/// Only the browser and the extractor are mandatory; VPN control defaults to
/// [`DisabledVpn`] and history to [`NoOpHistory`].
#[derive(Clone)]
pub struct Collaborators {
    /// Launches browser contexts
    pub browser: Arc<dyn BrowserDriver>,
    /// Downloads resolved media
    pub extractor: Arc<dyn ExtractionEngine>,
    /// Changes the network identity
    pub vpn: Arc<dyn VpnControl>,
    /// Receives one record per finished task
    pub history: Arc<dyn HistoryRecorder>,
}

impl Collaborators {
    /// Collaborators with VPN rotation and history disabled
    pub fn new(browser: Arc<dyn BrowserDriver>, extractor: Arc<dyn ExtractionEngine>) -> Self {
        Self {
            browser,
            extractor,
            vpn: Arc::new(DisabledVpn),
            history: Arc::new(NoOpHistory),
        }
    }

    /// Use `vpn` for identity rotation
    pub fn with_vpn(mut self, vpn: Arc<dyn VpnControl>) -> Self {
        self.vpn = vpn;
        self
    }

    /// Hand finished records to `history`
    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }

    /// Pick the real implementations available on this system
    ///
    /// - browser: Chrome over DevTools when built with the `browser` feature
    /// - extractor: `yt-dlp` from PATH
    /// - VPN: `nordvpn` (configured path or PATH) when `nordvpn_enabled`
    /// - history: JSON lines at `history_path` when set
    ///
    /// Anything missing falls back to an implementation that fails or does
    /// nothing, and a warning is logged.
    pub fn system(config: &Config) -> Self {
        #[cfg(feature = "browser")]
        let browser: Arc<dyn BrowserDriver> =
            Arc::new(crate::browser::ChromiumDriver::new(config.headless));
        #[cfg(not(feature = "browser"))]
        let browser: Arc<dyn BrowserDriver> = {
            tracing::warn!("built without the `browser` feature, every task will fail");
            Arc::new(crate::browser::UnavailableBrowser)
        };

        let extractor: Arc<dyn ExtractionEngine> = match YtDlpExtractor::from_path() {
            Some(extractor) => Arc::new(extractor),
            None => {
                tracing::warn!("yt-dlp not found in PATH, extraction will fail");
                Arc::new(UnavailableExtractor)
            }
        };

        let vpn: Arc<dyn VpnControl> = if config.nordvpn_enabled {
            match NordVpnControl::from_path(&config.vpn) {
                Some(vpn) => Arc::new(vpn),
                None => {
                    tracing::warn!("nordvpn client not found, identity rotation disabled");
                    Arc::new(DisabledVpn)
                }
            }
        } else {
            Arc::new(DisabledVpn)
        };

        let history: Arc<dyn HistoryRecorder> = match &config.history_path {
            Some(path) => Arc::new(JsonLinesHistory::new(path)),
            None => Arc::new(NoOpHistory),
        };

        Self {
            browser,
            extractor,
            vpn,
            history,
        }
    }
}

/// Admission and cancellation bookkeeping
#[derive(Clone)]
pub(crate) struct TaskState {
    /// Next task id to hand out
    pub(crate) next_id: Arc<AtomicU64>,
    /// Running tasks and their cancellation tokens
    pub(crate) active: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
    /// Cleared once shutdown starts
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every task token
    pub(crate) shutdown_token: CancellationToken,
}

/// Top-level scheduler (cloneable - all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use webvideo_dl::{Collaborators, Config, DownloadOrchestrator};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_file("config.json")?;
///     let orchestrator =
///         DownloadOrchestrator::new(config.clone(), Collaborators::system(&config)).await?;
///
///     let records = orchestrator
///         .submit(vec!["https://example.com/watch/1".to_string()])
///         .await?;
///     for record in &records {
///         println!("{} -> {:?}", record.url, record.outcome);
///     }
///
///     orchestrator.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DownloadOrchestrator {
    /// Validated configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Host to profile lookup
    pub(crate) profiles: Arc<SiteProfileRegistry>,
    /// Browser contexts, sized by `concurrent_downloads`
    pub(crate) pool: Arc<BrowserSessionPool>,
    /// VPN rotation coordinator
    pub(crate) identity: Arc<NetworkIdentityScheduler>,
    /// Per-attempt state machine
    pub(crate) navigator: Arc<SiteNavigator>,
    /// Sink for finished records
    pub(crate) history: Arc<dyn HistoryRecorder>,
    /// Attempt budget and backoff
    pub(crate) retry: RetryPolicy,
    /// Admission and cancellation state
    pub(crate) tasks: TaskState,
}

impl DownloadOrchestrator {
    /// Create an orchestrator
    ///
    /// Validates the configuration and every site profile (this is the only
    /// place configuration errors surface), builds the session pool and, when
    /// `nordvpn_enabled` is set, starts the identity rotation timer.
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let profiles = SiteProfileRegistry::from_config(&config)?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let pool = BrowserSessionPool::new(Arc::clone(&collaborators.browser), &config);

        let mut identity = NetworkIdentityScheduler::new(Arc::clone(&collaborators.vpn), &config)
            .with_events(event_tx.clone());
        if let Some(url) = &config.vpn.ip_check_url {
            identity = identity.with_ip_probe(PublicIpProbe::new(url.clone())?);
        }

        let navigator = SiteNavigator::new(
            Arc::clone(&collaborators.extractor),
            NavigatorSettings::from_config(&config),
        )
        .with_events(event_tx.clone());

        tracing::info!(
            browser = collaborators.browser.name(),
            extractor = collaborators.extractor.name(),
            vpn = collaborators.vpn.name(),
            history = collaborators.history.name(),
            sites = profiles.len(),
            concurrent_downloads = pool.capacity(),
            "orchestrator initialized"
        );

        let orchestrator = Self {
            retry: RetryPolicy::from_config(&config),
            config: Arc::new(config),
            event_tx,
            profiles: Arc::new(profiles),
            pool: Arc::new(pool),
            identity: Arc::new(identity),
            navigator: Arc::new(navigator),
            history: collaborators.history,
            tasks: TaskState {
                next_id: Arc::new(AtomicU64::new(1)),
                active: Arc::new(Mutex::new(HashMap::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown_token: CancellationToken::new(),
            },
        };

        if orchestrator.config.nordvpn_enabled {
            orchestrator.identity.start().await;
        }

        Ok(orchestrator)
    }

    /// Subscribe to orchestration events
    ///
    /// Each subscriber receives every event; a subscriber lagging more than
    /// 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration in use
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Current state of the identity rotation
    pub fn identity_snapshot(&self) -> IdentitySnapshot {
        self.identity.snapshot()
    }

    /// Highest number of browser sessions leased at the same time
    pub fn peak_active_sessions(&self) -> usize {
        self.pool.peak_active()
    }

    /// Browser sessions leased right now
    pub fn active_sessions(&self) -> usize {
        self.pool.active()
    }

    /// Emit an event to all subscribers
    ///
    /// Having no subscriber is fine; the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

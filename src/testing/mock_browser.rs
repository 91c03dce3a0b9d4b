//! Scripted browser for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::browser::{BrowserDriver, BrowserSession, SessionSettings};
use crate::error::BrowserError;

/// What the fake pages look like
///
/// Elements listed with [`element`](Self::element) are present on every page
/// after a navigation. Elements registered with
/// [`reveal_on_click`](Self::reveal_on_click) appear only after their trigger
/// was clicked in the same session and disappear on the next navigation.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    elements: HashSet<String>,
    media: HashMap<String, String>,
    reveals: HashMap<String, Vec<String>>,
    navigation_delay: Duration,
    navigation_error: Option<BrowserError>,
    interaction_delay: Duration,
    title: Option<String>,
}

impl PageScript {
    /// Empty page: nothing matches
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `selector` present on every loaded page
    pub fn element(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self
    }

    /// Media reference returned for `selector`
    ///
    /// Does not make the element present by itself.
    pub fn media(mut self, selector: &str, source: &str) -> Self {
        self.media.insert(selector.to_string(), source.to_string());
        self
    }

    /// Clicking `trigger` makes `selector` appear
    pub fn reveal_on_click(mut self, trigger: &str, selector: &str) -> Self {
        self.reveals
            .entry(trigger.to_string())
            .or_default()
            .push(selector.to_string());
        self
    }

    /// Time each navigation takes
    pub fn navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    /// Make every navigation fail with `error`
    pub fn navigation_error(mut self, error: BrowserError) -> Self {
        self.navigation_error = Some(error);
        self
    }

    /// Time each click and fill hangs before completing
    ///
    /// The mock ignores any timeout here, like a stuck DevTools call.
    pub fn interaction_delay(mut self, delay: Duration) -> Self {
        self.interaction_delay = delay;
        self
    }

    /// Document title
    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
}

/// A browser interaction recorded for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAction {
    /// Page load
    Navigate {
        /// Session that navigated
        session: u64,
        /// Requested URL
        url: String,
    },
    /// Element click
    Click {
        /// Session that clicked
        session: u64,
        /// Clicked selector
        selector: String,
    },
    /// Text typed into a field
    Fill {
        /// Session that typed
        session: u64,
        /// Target selector
        selector: String,
        /// Typed text
        value: String,
    },
    /// Extra headers installed
    Headers {
        /// Session the headers apply to
        session: u64,
        /// Header map, sorted by name
        headers: Vec<(String, String)>,
    },
}

/// Mock implementation of the BrowserDriver trait.
///
/// Provides controllable behavior for testing:
/// - Serve pages described by a [`PageScript`]
/// - Record every navigation, click and fill
/// - Simulate launch failures and crashed contexts
/// - Track how many contexts are open
///
/// # Example
///
/// ```rust,ignore
/// use webvideo_dl::testing::{MockBrowserDriver, PageScript};
///
/// let driver = MockBrowserDriver::with_script(PageScript::new().element(".play"));
/// // ... run tasks ...
/// assert_eq!(driver.open_sessions(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockBrowserDriver {
    /// Page behaviour shared by every session.
    script: Arc<RwLock<PageScript>>,
    /// Interactions across all sessions.
    actions: Arc<RwLock<Vec<RecordedAction>>>,
    /// User agents requested at launch.
    user_agents: Arc<RwLock<Vec<String>>>,
    /// Liveness flags of launched sessions.
    live_flags: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    /// Sessions launched so far.
    launches: Arc<AtomicUsize>,
    /// Sessions closed so far.
    closes: Arc<AtomicUsize>,
    /// Whether launches fail.
    fail_launch: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl Default for MockBrowserDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowserDriver {
    /// Create a driver serving empty pages.
    pub fn new() -> Self {
        Self::with_script(PageScript::new())
    }

    /// Create a driver serving pages described by `script`.
    pub fn with_script(script: PageScript) -> Self {
        Self {
            script: Arc::new(RwLock::new(script)),
            actions: Arc::new(RwLock::new(Vec::new())),
            user_agents: Arc::new(RwLock::new(Vec::new())),
            live_flags: Arc::new(Mutex::new(Vec::new())),
            launches: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_launch: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replace the page script, including for sessions already open.
    pub async fn set_script(&self, script: PageScript) {
        *self.script.write().await = script;
    }

    /// Make subsequent launches fail.
    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Number of sessions launched.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Sessions launched and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.launch_count()
            .saturating_sub(self.closes.load(Ordering::SeqCst))
    }

    /// Kill every session launched so far.
    pub fn crash_open_sessions(&self) {
        let flags = self.live_flags.lock().unwrap_or_else(PoisonError::into_inner);
        for flag in flags.iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// All recorded interactions, in order.
    pub async fn recorded_actions(&self) -> Vec<RecordedAction> {
        self.actions.read().await.clone()
    }

    /// URLs loaded across all sessions, in order.
    pub async fn navigated_urls(&self) -> Vec<String> {
        self.actions
            .read()
            .await
            .iter()
            .filter_map(|a| match a {
                RecordedAction::Navigate { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// User agents requested at launch, in order.
    pub async fn launched_user_agents(&self) -> Vec<String> {
        self.user_agents.read().await.clone()
    }
}

#[async_trait]
impl BrowserDriver for MockBrowserDriver {
    async fn launch_session(
        &self,
        settings: &SessionSettings,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(BrowserError::Crashed("mock launch failure".into()));
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.live_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&alive));
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.user_agents
            .write()
            .await
            .push(settings.user_agent.clone());

        Ok(Box::new(MockSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            script: Arc::clone(&self.script),
            actions: Arc::clone(&self.actions),
            closes: Arc::clone(&self.closes),
            alive,
            closed: false,
            url: String::new(),
            revealed: HashSet::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockSession {
    id: u64,
    script: Arc<RwLock<PageScript>>,
    actions: Arc<RwLock<Vec<RecordedAction>>>,
    closes: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
    closed: bool,
    url: String,
    revealed: HashSet<String>,
}

impl MockSession {
    fn check_alive(&self) -> Result<(), BrowserError> {
        if self.closed || !self.alive.load(Ordering::SeqCst) {
            return Err(BrowserError::Crashed(format!("mock session {} is gone", self.id)));
        }
        Ok(())
    }

    async fn visible(&self, selector: &str) -> bool {
        !self.url.is_empty()
            && (self.revealed.contains(selector)
                || self.script.read().await.elements.contains(selector))
    }

    async fn record(&self, action: RecordedAction) {
        self.actions.write().await.push(action);
    }

    async fn hang(&self) {
        let delay = self.script.read().await.interaction_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.check_alive()?;
        self.record(RecordedAction::Navigate {
            session: self.id,
            url: url.to_string(),
        })
        .await;

        let (delay, error) = {
            let script = self.script.read().await;
            (script.navigation_delay, script.navigation_error.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay.min(timeout)).await;
            if delay > timeout {
                return Err(BrowserError::Timeout(format!("{} did not load", url)));
            }
        }
        if let Some(error) = error {
            return Err(error);
        }

        self.url = url.to_string();
        self.revealed.clear();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.check_alive()?;
        Ok(self.url.clone())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.check_alive()?;
        Ok(self.script.read().await.title.clone().unwrap_or_default())
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, BrowserError> {
        self.check_alive()?;
        Ok(self.visible(selector).await)
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        self.check_alive()?;
        if !self.visible(selector).await {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(RecordedAction::Click {
            session: self.id,
            selector: selector.to_string(),
        })
        .await;
        self.hang().await;

        let revealed = self
            .script
            .read()
            .await
            .reveals
            .get(selector)
            .cloned()
            .unwrap_or_default();
        self.revealed.extend(revealed);
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.check_alive()?;
        if !self.visible(selector).await {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(RecordedAction::Fill {
            session: self.id,
            selector: selector.to_string(),
            value: value.to_string(),
        })
        .await;
        self.hang().await;
        Ok(())
    }

    async fn media_source(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        self.check_alive()?;
        if !self.visible(selector).await {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(self.script.read().await.media.get(selector).cloned())
    }

    async fn set_extra_headers(
        &mut self,
        headers: &HashMap<String, String>,
    ) -> Result<(), BrowserError> {
        self.check_alive()?;
        let mut sorted: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        sorted.sort();
        self.record(RecordedAction::Headers {
            session: self.id,
            headers: sorted,
        })
        .await;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.check_alive().is_ok()
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

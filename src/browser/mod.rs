//! Browser automation capability
//!
//! The orchestrator never talks to a browser directly. It goes through two
//! traits:
//!
//! - [`BrowserDriver`] launches isolated browser contexts
//! - [`BrowserSession`] drives one context (navigate, probe selectors, click, fill)
//!
//! Implementations provided:
//!
//! - `ChromiumDriver` (cargo feature `browser`): Chrome/Chromium over the DevTools protocol
//! - [`UnavailableBrowser`]: always fails to launch, used when no backend is compiled in
//! - [`MockBrowserDriver`](crate::testing::MockBrowserDriver): scripted pages for tests
//!
//! ## Usage
//!
//! ```no_run
//! use webvideo_dl::browser::{BrowserDriver, SessionSettings, UnavailableBrowser};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = UnavailableBrowser;
//! let settings = SessionSettings { user_agent: "Mozilla/5.0".into(), headless: true };
//! let mut session = driver.launch_session(&settings).await?;
//! session.navigate("https://example.com/watch/1", Duration::from_secs(30)).await?;
//! if session.element_exists(".play-button").await? {
//!     session.click(".play-button").await?;
//! }
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "browser")]
mod chromium;

#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;

use crate::error::BrowserError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Script injected before any page script runs to hide automation markers
pub const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = { runtime: {} };
"#;

/// Per-context launch settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// User agent presented by the context
    pub user_agent: String,
    /// Run without a visible window
    pub headless: bool,
}

/// Launches isolated browser contexts
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Start a fresh context with its own cookies and storage
    async fn launch_session(
        &self,
        settings: &SessionSettings,
    ) -> Result<Box<dyn BrowserSession>, BrowserError>;

    /// Name of the backend for logging
    fn name(&self) -> &'static str;
}

/// One live browser context
///
/// A session is used by exactly one task attempt at a time; the pool hands it
/// out by value.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` and wait for it to finish loading
    ///
    /// Returns [`BrowserError::Timeout`] when the load does not complete in `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// URL of the currently loaded document
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Title of the currently loaded document
    async fn title(&self) -> Result<String, BrowserError>;

    /// Whether at least one element matches `selector` right now
    async fn element_exists(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Click the first element matching `selector`
    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    /// Type `value` into the first element matching `selector`
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Media reference of the first element matching `selector`
    ///
    /// Reads `href`, then `src`, then `data-src`; `None` when the element has none.
    async fn media_source(&self, selector: &str) -> Result<Option<String>, BrowserError>;

    /// Send these headers with every subsequent request of the context
    async fn set_extra_headers(
        &mut self,
        headers: &HashMap<String, String>,
    ) -> Result<(), BrowserError>;

    /// Cheap liveness probe used before a pooled session is reused
    async fn is_alive(&self) -> bool;

    /// Tear the context down
    async fn close(&mut self);
}

/// Driver used when no browser backend is available
///
/// Every launch fails with [`BrowserError::Crashed`], so tasks end as
/// `session_failure` instead of hanging.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBrowser;

#[async_trait]
impl BrowserDriver for UnavailableBrowser {
    async fn launch_session(
        &self,
        _settings: &SessionSettings,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        Err(BrowserError::Crashed(
            "no browser backend available (build with the `browser` feature)".into(),
        ))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

//! Test doubles for the orchestrator's collaborators
//!
//! Every external capability the orchestrator depends on has a scripted,
//! in-memory implementation here, so the whole engine can run without a
//! browser, a VPN client or yt-dlp.
//!
//! # Example
//!
//! ```rust,ignore
//! use webvideo_dl::testing::{MockBrowserDriver, MockExtractor, PageScript};
//!
//! let driver = MockBrowserDriver::with_script(
//!     PageScript::new()
//!         .element(".play")
//!         .reveal_on_click(".play", "video source")
//!         .media("video source", "/media/1.mp4"),
//! );
//! let extractor = MockExtractor::new();
//!
//! // hand both to Collaborators::new(...)
//! ```

mod memory_history;
mod mock_browser;
mod mock_extractor;
mod mock_vpn;

pub use memory_history::MemoryHistory;
pub use mock_browser::{MockBrowserDriver, PageScript, RecordedAction};
pub use mock_extractor::MockExtractor;
pub use mock_vpn::MockVpnControl;

/// Config fixtures for tests
pub mod fixtures {
    use crate::config::{Config, SiteProfileConfig};
    use std::path::Path;
    use std::time::Duration;

    /// Site profile with one play control, one media link and no pauses
    pub fn instant_site() -> SiteProfileConfig {
        SiteProfileConfig {
            video_button: vec![".play".to_string()],
            download_link: vec!["video source".to_string()],
            human_delay_min: 0.0,
            human_delay_max: 0.0,
            ..Default::default()
        }
    }

    /// Config tuned for fast tests: no pauses, short timeouts, no retry delay
    pub fn fast_config(output_dir: &Path) -> Config {
        let mut config = Config {
            output_directory: output_dir.to_path_buf(),
            nordvpn_enabled: false,
            timeout: Duration::from_secs(5),
            session_acquire_timeout: Duration::from_secs(60),
            selector_poll_interval_ms: 250,
            retry_attempts: 3,
            ..Default::default()
        };
        config.default_site = Some(instant_site());
        config.retry.initial_delay = Duration::ZERO;
        config.retry.max_delay = Duration::ZERO;
        config.retry.jitter = false;
        config
    }
}

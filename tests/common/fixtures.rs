//! Page scripts, configs and orchestrator builders shared by the integration tests

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use webvideo_dl::testing::fixtures::{fast_config, instant_site};
use webvideo_dl::testing::{MockBrowserDriver, MockExtractor, PageScript};
use webvideo_dl::{Collaborators, Config, DownloadOrchestrator, SiteProfileConfig};

/// Media URL served by [`playable_page`]
pub const MEDIA_URL: &str = "https://cdn.example.com/media/clip.mp4";

/// Page with a `.play` control that reveals a `video source` element
pub fn playable_page() -> PageScript {
    PageScript::new()
        .element(".play")
        .reveal_on_click(".play", "video source")
        .media("video source", MEDIA_URL)
        .title("Sample Clip")
}

/// Site profile with a login block and no pauses
pub fn login_site() -> SiteProfileConfig {
    SiteProfileConfig {
        login_url: Some("https://members.example.com/login".to_string()),
        login_username: Some("viewer".to_string()),
        login_password: Some("s3cret".to_string()),
        login_username_field: "#user".to_string(),
        login_password_field: "#pass".to_string(),
        login_submit_button: "#go".to_string(),
        wait_after_login: Duration::from_secs(1),
        ..instant_site()
    }
}

/// Fast test config writing into a fresh temp dir
pub fn test_config() -> (Config, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let config = fast_config(dir.path());
    (config, dir)
}

/// Orchestrator over the given mocks with VPN rotation disabled
pub async fn orchestrator(
    config: Config,
    driver: &MockBrowserDriver,
    extractor: &MockExtractor,
) -> DownloadOrchestrator {
    DownloadOrchestrator::new(
        config,
        Collaborators::new(Arc::new(driver.clone()), Arc::new(extractor.clone())),
    )
    .await
    .expect("create orchestrator")
}

/// `count` distinct URLs on `host`
pub fn urls(host: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("https://{}/watch/{}", host, i))
        .collect()
}

//! Chrome/Chromium backend over the DevTools protocol

use super::{BrowserDriver, BrowserSession, STEALTH_SCRIPT, SessionSettings};
use crate::error::BrowserError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long a liveness probe may take before the page counts as dead
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningBrowser {
    browser: Arc<Browser>,
    handler: tokio::task::JoinHandle<()>,
}

/// Launches one browser process on first use and opens a page per session
pub struct ChromiumDriver {
    headless: bool,
    running: Mutex<Option<RunningBrowser>>,
}

impl ChromiumDriver {
    /// Create a driver; the browser process starts with the first session
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            running: Mutex::new(None),
        }
    }

    async fn browser(&self) -> Result<Arc<Browser>, BrowserError> {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref()
            && !r.handler.is_finished()
        {
            return Ok(Arc::clone(&r.browser));
        }

        let mut builder = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run");
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Protocol)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Crashed(format!("failed to launch browser: {}", e)))?;

        // The handler stream must be polled for the connection to make progress
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler event error");
                }
            }
        });

        let browser = Arc::new(browser);
        tracing::info!(headless = self.headless, "browser launched");
        *running = Some(RunningBrowser {
            browser: Arc::clone(&browser),
            handler,
        });
        Ok(browser)
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        if let Some(r) = self.running.get_mut().take() {
            r.handler.abort();
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch_session(
        &self,
        settings: &SessionSettings,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Crashed(format!("failed to open page: {}", e)))?;

        page.execute(SetUserAgentOverrideParams::new(settings.user_agent.clone()))
            .await
            .map_err(protocol)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(protocol)?;

        Ok(Box::new(ChromiumSession {
            page: Some(page),
            _browser: browser,
        }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

fn protocol(e: chromiumoxide::error::CdpError) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

struct ChromiumSession {
    page: Option<Page>,
    _browser: Arc<Browser>,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page, BrowserError> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Crashed("session already closed".into()))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let page = self.page()?;
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Protocol(format!("navigation to {} failed: {}", url, e))),
            Err(_) => Err(BrowserError::Timeout(format!(
                "{} did not load within {:?}",
                url, timeout
            ))),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let url = self.page()?.url().await.map_err(protocol)?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        let title = self.page()?.get_title().await.map_err(protocol)?;
        Ok(title.unwrap_or_default())
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!(
            "document.querySelector({}) !== null",
            serde_json::Value::String(selector.to_string())
        );
        let found: bool = self
            .page()?
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        Ok(found)
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element.click().await.map_err(protocol)?;
        element.type_str(value).await.map_err(protocol)?;
        Ok(())
    }

    async fn media_source(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        for attr in ["href", "src", "data-src"] {
            if let Some(value) = element.attribute(attr).await.map_err(protocol)?
                && !value.trim().is_empty()
            {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn set_extra_headers(
        &mut self,
        headers: &HashMap<String, String>,
    ) -> Result<(), BrowserError> {
        if headers.is_empty() {
            return Ok(());
        }
        let value = serde_json::to_value(headers).map_err(|e| BrowserError::Protocol(e.to_string()))?;
        self.page()?
            .execute(SetExtraHttpHeadersParams::new(Headers::new(value)))
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let Ok(page) = self.page() else {
            return false;
        };
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, page.evaluate("1")).await,
            Ok(Ok(_))
        )
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take()
            && let Err(e) = page.close().await
        {
            tracing::debug!(error = %e, "failed to close page");
        }
    }
}

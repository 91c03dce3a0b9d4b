//! Per-attempt site navigation
//!
//! [`SiteNavigator`] drives one leased browser session through an explicit
//! state machine:
//!
//! ```text
//! Init -> Navigated -> [LoginPending -> LoggedIn] -> ControlLocated -> MediaResolved -> Done
//!   any state -> Failed(reason)
//! ```
//!
//! Every interactive step is preceded by a randomized human-like pause drawn
//! from the site profile, and every wait observes the task's cancellation
//! token. The navigator reports the stages it went through so the caller can
//! decide whether the session is still clean enough to reuse.

mod probe;

use crate::browser::BrowserSession;
use crate::config::Config;
use crate::error::{BrowserError, TaskError};
use crate::extraction::{ExtractionEngine, ExtractionRequest};
use crate::profiles::{LoginProfile, SiteProfile};
use crate::types::{Event, NavStage, TaskId};
use crate::utils::resolve_media_url;
use probe::{first_match, pause, suspend};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Timing and output settings shared by all attempts
#[derive(Clone, Debug, PartialEq)]
pub struct NavigatorSettings {
    /// Bound on page loads and on each selector search
    pub timeout: Duration,
    /// Pause between selector probing rounds
    pub poll_interval: Duration,
    /// Directory handed to the extraction engine
    pub output_dir: PathBuf,
}

impl NavigatorSettings {
    /// Settings from the global config
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.timeout,
            poll_interval: config.selector_poll_interval(),
            output_dir: config.output_directory.clone(),
        }
    }
}

/// What one attempt needs to know about its task
#[derive(Clone, Copy, Debug)]
pub struct Attempt<'a> {
    /// Owning task
    pub task_id: TaskId,
    /// Task URL
    pub url: &'a str,
    /// Normalized host of the task URL
    pub host: &'a str,
    /// Profile resolved for the host
    pub profile: &'a SiteProfile,
    /// Task cancellation token
    pub cancel: &'a CancellationToken,
}

/// Stages visited by one attempt and how it ended
#[derive(Debug)]
pub struct NavigationRun {
    /// Stages in the order they were entered, starting with `Init`
    pub stages: Vec<NavStage>,
    /// Extracted file or the reason the attempt failed
    pub result: Result<PathBuf, TaskError>,
}

impl NavigationRun {
    /// Last stage reached before the attempt ended
    pub fn last_progress(&self) -> NavStage {
        self.stages
            .iter()
            .rev()
            .copied()
            .find(|s| *s != NavStage::Failed)
            .unwrap_or(NavStage::Init)
    }

    /// Whether the session can go back to the pool afterwards
    ///
    /// Only a successful attempt, or one cancelled before it touched a page,
    /// leaves a clean context. Every failed attempt is closed so its retry
    /// starts from a fresh context without cookies or half-filled forms.
    pub fn session_reusable(&self) -> bool {
        match &self.result {
            Ok(_) => true,
            Err(TaskError::Cancelled) => !self.last_progress().is_mid_navigation(),
            Err(_) => false,
        }
    }
}

enum NavState {
    Init,
    Navigated,
    LoginPending(LoginProfile),
    LoggedIn(String),
    ControlLocated(String),
    MediaResolved(String),
    Done(PathBuf),
    Failed(TaskError),
}

impl NavState {
    fn stage(&self) -> NavStage {
        match self {
            NavState::Init => NavStage::Init,
            NavState::Navigated => NavStage::Navigated,
            NavState::LoginPending(_) => NavStage::LoginPending,
            NavState::LoggedIn(_) => NavStage::LoggedIn,
            NavState::ControlLocated(_) => NavStage::ControlLocated,
            NavState::MediaResolved(_) => NavStage::MediaResolved,
            NavState::Done(_) => NavStage::Done,
            NavState::Failed(_) => NavStage::Failed,
        }
    }
}

/// Drives a browser session from the task URL to an extracted file
pub struct SiteNavigator {
    extractor: Arc<dyn ExtractionEngine>,
    settings: NavigatorSettings,
    events: Option<broadcast::Sender<Event>>,
}

impl SiteNavigator {
    /// Create a navigator handing resolved media to `extractor`
    pub fn new(extractor: Arc<dyn ExtractionEngine>, settings: NavigatorSettings) -> Self {
        Self {
            extractor,
            settings,
            events: None,
        }
    }

    /// Emit [`Event::StageChanged`] on `sender`
    pub fn with_events(mut self, sender: broadcast::Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Navigation settings
    pub fn settings(&self) -> &NavigatorSettings {
        &self.settings
    }

    /// Run one attempt from `Init` to `Done` or `Failed`
    pub async fn run(&self, attempt: Attempt<'_>, session: &mut dyn BrowserSession) -> NavigationRun {
        let mut stages = vec![NavStage::Init];
        let mut state = NavState::Init;

        loop {
            let next = match state {
                NavState::Done(path) => {
                    return NavigationRun {
                        stages,
                        result: Ok(path),
                    };
                }
                NavState::Failed(error) => {
                    return NavigationRun {
                        stages,
                        result: Err(error),
                    };
                }
                NavState::Init => self.open_task_page(&attempt, session).await,
                NavState::Navigated => match &attempt.profile.login {
                    Some(login) => NavState::LoginPending(login.clone()),
                    None => self.locate_control(&attempt, session).await,
                },
                NavState::LoginPending(login) => self.log_in(&attempt, session, &login).await,
                NavState::LoggedIn(login_url) => {
                    self.return_to_task_page(&attempt, session, &login_url)
                        .await
                }
                NavState::ControlLocated(selector) => {
                    self.resolve_media(&attempt, session, &selector).await
                }
                NavState::MediaResolved(media_url) => {
                    self.extract(&attempt, session, media_url).await
                }
            };

            let stage = next.stage();
            match &next {
                NavState::Failed(error) => tracing::debug!(
                    task_id = attempt.task_id.get(),
                    error = %error,
                    "navigation failed"
                ),
                _ => tracing::debug!(task_id = attempt.task_id.get(), stage = ?stage, "navigation stage"),
            }
            stages.push(stage);
            if let Some(events) = &self.events {
                let _ = events.send(Event::StageChanged {
                    id: attempt.task_id,
                    stage,
                });
            }
            state = next;
        }
    }

    async fn interact_pause(&self, attempt: &Attempt<'_>) -> Result<(), TaskError> {
        pause(
            attempt.cancel,
            attempt.profile.human_delay_min,
            attempt.profile.human_delay_max,
        )
        .await
    }

    /// Await one browser call, bounded by the step timeout and the task token
    ///
    /// The outer error is cancellation; a call that outlives the timeout
    /// becomes [`BrowserError::Timeout`].
    async fn step<T>(
        &self,
        attempt: &Attempt<'_>,
        call: impl Future<Output = Result<T, BrowserError>>,
    ) -> Result<Result<T, BrowserError>, TaskError> {
        let limit = self.settings.timeout;
        match suspend(attempt.cancel, tokio::time::timeout(limit, call)).await? {
            Ok(result) => Ok(result),
            Err(_) => Ok(Err(BrowserError::Timeout(format!(
                "browser call did not finish within {}s",
                limit.as_secs()
            )))),
        }
    }

    async fn load(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<(), TaskError> {
        self.interact_pause(attempt).await?;
        match suspend(attempt.cancel, session.navigate(url, self.settings.timeout)).await? {
            Ok(()) => Ok(()),
            Err(BrowserError::Crashed(message)) => Err(TaskError::SessionFailure(message)),
            Err(e) => Err(TaskError::NavigationTimeout(e.to_string())),
        }
    }

    async fn open_task_page(&self, attempt: &Attempt<'_>, session: &mut dyn BrowserSession) -> NavState {
        if !attempt.profile.custom_headers.is_empty() {
            let applied = self
                .step(attempt, session.set_extra_headers(&attempt.profile.custom_headers))
                .await;
            match applied {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return NavState::Failed(browser_failure(e, TaskError::NavigationTimeout)),
                Err(cancelled) => return NavState::Failed(cancelled),
            }
        }
        match self.load(attempt, session, attempt.url).await {
            Ok(()) => NavState::Navigated,
            Err(e) => NavState::Failed(e),
        }
    }

    async fn log_in(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        login: &LoginProfile,
    ) -> NavState {
        match self.submit_login(attempt, session, login).await {
            Ok(()) => {
                tracing::info!(task_id = attempt.task_id.get(), host = %attempt.host, "logged in");
                NavState::LoggedIn(login.url.clone())
            }
            Err(e) => NavState::Failed(e),
        }
    }

    async fn submit_login(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        login: &LoginProfile,
    ) -> Result<(), TaskError> {
        let current = self
            .step(attempt, session.current_url())
            .await?
            .unwrap_or_default();
        if !same_page(&current, &login.url) {
            self.load(attempt, session, &login.url)
                .await
                .map_err(as_login_failure)?;
        }

        self.interact_pause(attempt).await?;
        self.step(attempt, session.fill(&login.username_field, &login.username))
            .await?
            .map_err(|e| browser_failure(e, TaskError::LoginFailure))?;

        self.interact_pause(attempt).await?;
        self.step(attempt, session.fill(&login.password_field, &login.password))
            .await?
            .map_err(|e| browser_failure(e, TaskError::LoginFailure))?;

        self.interact_pause(attempt).await?;
        self.step(attempt, session.click(&login.submit_button))
            .await?
            .map_err(|e| browser_failure(e, TaskError::LoginFailure))?;

        suspend(attempt.cancel, tokio::time::sleep(login.wait_after)).await?;

        if let Some(marker) = &login.success_marker {
            let found = first_match(
                session,
                std::slice::from_ref(marker),
                self.settings.timeout,
                self.settings.poll_interval,
                attempt.cancel,
            )
            .await?;
            if found.is_none() {
                return Err(TaskError::LoginFailure(format!(
                    "success marker '{}' never appeared",
                    marker
                )));
            }
        }
        Ok(())
    }

    async fn return_to_task_page(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        login_url: &str,
    ) -> NavState {
        if !same_page(login_url, attempt.url)
            && let Err(e) = self.load(attempt, session, attempt.url).await
        {
            return NavState::Failed(e);
        }
        self.locate_control(attempt, session).await
    }

    async fn locate_control(&self, attempt: &Attempt<'_>, session: &mut dyn BrowserSession) -> NavState {
        let found = first_match(
            session,
            &attempt.profile.video_button,
            self.settings.timeout,
            self.settings.poll_interval,
            attempt.cancel,
        )
        .await;
        match found {
            Ok(Some(selector)) => NavState::ControlLocated(selector),
            Ok(None) => NavState::Failed(TaskError::SelectorNotFound(format!(
                "no play control matched [{}]",
                attempt.profile.video_button.join(", ")
            ))),
            Err(e) => NavState::Failed(e),
        }
    }

    async fn resolve_media(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        control: &str,
    ) -> NavState {
        match self.click_and_read_source(attempt, session, control).await {
            Ok(media_url) => NavState::MediaResolved(media_url),
            Err(e) => NavState::Failed(e),
        }
    }

    async fn click_and_read_source(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        control: &str,
    ) -> Result<String, TaskError> {
        self.interact_pause(attempt).await?;
        self.step(attempt, session.click(control))
            .await?
            .map_err(|e| browser_failure(e, TaskError::SelectorNotFound))?;

        let link = first_match(
            session,
            &attempt.profile.download_link,
            self.settings.timeout,
            self.settings.poll_interval,
            attempt.cancel,
        )
        .await?
        .ok_or_else(|| {
            TaskError::SelectorNotFound(format!(
                "no media link matched [{}]",
                attempt.profile.download_link.join(", ")
            ))
        })?;

        let source = self
            .step(attempt, session.media_source(&link))
            .await?
            .map_err(|e| browser_failure(e, TaskError::SelectorNotFound))?
            .ok_or_else(|| {
                TaskError::SelectorNotFound(format!("'{}' has no href, src or data-src", link))
            })?;

        let page_url = match self.step(attempt, session.current_url()).await? {
            Ok(url) if !url.is_empty() => url,
            _ => attempt.url.to_string(),
        };
        resolve_media_url(&page_url, &source).ok_or_else(|| {
            TaskError::SelectorNotFound(format!("'{}' is not a usable media URL", source))
        })
    }

    async fn extract(
        &self,
        attempt: &Attempt<'_>,
        session: &mut dyn BrowserSession,
        media_url: String,
    ) -> NavState {
        let title = match self.step(attempt, session.title()).await {
            Ok(title) => title.ok().filter(|t| !t.trim().is_empty()),
            Err(cancelled) => return NavState::Failed(cancelled),
        };
        let page_url = match self.step(attempt, session.current_url()).await {
            Ok(Ok(url)) if !url.is_empty() => url,
            Ok(_) => attempt.url.to_string(),
            Err(cancelled) => return NavState::Failed(cancelled),
        };

        let request = ExtractionRequest {
            media_url,
            page_url,
            host: attempt.host.to_string(),
            title,
            output_dir: self.settings.output_dir.clone(),
            headers: attempt.profile.custom_headers.clone(),
        };

        tracing::info!(
            task_id = attempt.task_id.get(),
            media_url = %request.media_url,
            extractor = self.extractor.name(),
            "media resolved, extracting"
        );

        match suspend(attempt.cancel, self.extractor.extract(&request)).await {
            Err(cancelled) => NavState::Failed(cancelled),
            Ok(Ok(path)) if !path.as_os_str().is_empty() => NavState::Done(path),
            Ok(Ok(_)) => NavState::Failed(TaskError::ExtractionFailure(
                "extractor returned an empty path".into(),
            )),
            Ok(Err(e)) => NavState::Failed(TaskError::ExtractionFailure(e.to_string())),
        }
    }
}

/// Map a browser error, keeping crashes distinct from step failures
fn browser_failure(error: BrowserError, otherwise: fn(String) -> TaskError) -> TaskError {
    match error {
        BrowserError::Crashed(message) => TaskError::SessionFailure(message),
        other => otherwise(other.to_string()),
    }
}

fn as_login_failure(error: TaskError) -> TaskError {
    match error {
        TaskError::NavigationTimeout(message) => {
            TaskError::LoginFailure(format!("login page did not load: {}", message))
        }
        other => other,
    }
}

/// Compare two URLs ignoring a trailing slash and fragment
fn same_page(a: &str, b: &str) -> bool {
    fn canonical(u: &str) -> String {
        let without_fragment = u.split('#').next().unwrap_or(u);
        without_fragment.trim_end_matches('/').to_string()
    }
    !a.is_empty() && canonical(a) == canonical(b)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserDriver, SessionSettings};
    use crate::config::SiteProfileConfig;
    use crate::testing::{MockBrowserDriver, MockExtractor, PageScript, RecordedAction};

    const TASK_URL: &str = "https://example.com/watch/1";

    fn profile(raw: SiteProfileConfig) -> SiteProfile {
        SiteProfile::from_config(Some("example.com".into()), &raw, "sites.example.com").unwrap()
    }

    fn quick_site() -> SiteProfileConfig {
        SiteProfileConfig {
            video_button: vec![".play".into(), "video".into()],
            download_link: vec!["video source".into()],
            human_delay_min: 0.0,
            human_delay_max: 0.0,
            ..Default::default()
        }
    }

    fn settings() -> NavigatorSettings {
        NavigatorSettings {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            output_dir: PathBuf::from("/tmp/out"),
        }
    }

    async fn launch(driver: &MockBrowserDriver) -> Box<dyn BrowserSession> {
        driver
            .launch_session(&SessionSettings {
                user_agent: "ua".into(),
                headless: true,
            })
            .await
            .unwrap()
    }

    async fn run_once(
        script: PageScript,
        site: SiteProfileConfig,
        extractor: MockExtractor,
        cancel: &CancellationToken,
    ) -> (NavigationRun, MockBrowserDriver) {
        let driver = MockBrowserDriver::with_script(script);
        let mut session = launch(&driver).await;
        let navigator = SiteNavigator::new(Arc::new(extractor), settings());
        let profile = profile(site);
        let attempt = Attempt {
            task_id: TaskId(1),
            url: TASK_URL,
            host: "example.com",
            profile: &profile,
            cancel,
        };
        let run = navigator.run(attempt, session.as_mut()).await;
        (run, driver)
    }

    fn playable() -> PageScript {
        PageScript::new()
            .element(".play")
            .reveal_on_click(".play", "video source")
            .media("video source", "/media/1.mp4")
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reaches_done() {
        let extractor = MockExtractor::new();
        let (run, _) = run_once(playable(), quick_site(), extractor.clone(), &CancellationToken::new()).await;

        let path = run.result.as_ref().unwrap();
        assert!(!path.as_os_str().is_empty());
        assert_eq!(
            run.stages,
            vec![
                NavStage::Init,
                NavStage::Navigated,
                NavStage::ControlLocated,
                NavStage::MediaResolved,
                NavStage::Done
            ]
        );

        let requests = extractor.recorded_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].media_url, "https://example.com/media/1.mp4");
        assert_eq!(requests[0].host, "example.com");
        assert!(run.session_reusable());
    }

    #[tokio::test(start_paused = true)]
    async fn first_declared_control_is_clicked() {
        let script = playable().element("video");
        let (run, driver) =
            run_once(script, quick_site(), MockExtractor::new(), &CancellationToken::new()).await;
        assert!(run.result.is_ok());

        let clicks: Vec<String> = driver
            .recorded_actions()
            .await
            .into_iter()
            .filter_map(|a| match a {
                RecordedAction::Click { selector, .. } => Some(selector),
                _ => None,
            })
            .collect();
        assert_eq!(clicks, vec![".play".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_control_is_selector_not_found() {
        let (run, _) = run_once(
            PageScript::new(),
            quick_site(),
            MockExtractor::new(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(run.result, Err(TaskError::SelectorNotFound(_))));
        assert_eq!(run.stages.last(), Some(&NavStage::Failed));
        assert_eq!(run.last_progress(), NavStage::Navigated);
    }

    #[tokio::test(start_paused = true)]
    async fn link_without_source_is_selector_not_found() {
        let script = PageScript::new().element(".play").element("video source");
        let (run, _) = run_once(script, quick_site(), MockExtractor::new(), &CancellationToken::new()).await;
        match run.result {
            Err(TaskError::SelectorNotFound(message)) => assert!(message.contains("no href")),
            other => panic!("expected SelectorNotFound, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_timeout_is_classified() {
        let script = playable().navigation_error(BrowserError::Timeout("slow".into()));
        let (run, _) = run_once(script, quick_site(), MockExtractor::new(), &CancellationToken::new()).await;
        assert!(matches!(run.result, Err(TaskError::NavigationTimeout(_))));
        assert_eq!(run.stages, vec![NavStage::Init, NavStage::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_session_is_session_failure_and_not_reusable() {
        let script = playable().navigation_error(BrowserError::Crashed("renderer gone".into()));
        let (run, _) = run_once(script, quick_site(), MockExtractor::new(), &CancellationToken::new()).await;
        assert!(matches!(run.result, Err(TaskError::SessionFailure(_))));
        assert!(!run.session_reusable());
    }

    #[tokio::test(start_paused = true)]
    async fn extractor_error_is_extraction_failure() {
        let extractor = MockExtractor::new();
        extractor
            .set_next_error(crate::error::ExtractionError::Failed("403".into()))
            .await;
        let (run, _) = run_once(playable(), quick_site(), extractor, &CancellationToken::new()).await;
        assert!(matches!(run.result, Err(TaskError::ExtractionFailure(_))));
        assert_eq!(run.last_progress(), NavStage::MediaResolved);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_extractor_path_is_not_done() {
        let extractor = MockExtractor::new();
        extractor.set_return_empty_path(true).await;
        let (run, _) = run_once(playable(), quick_site(), extractor, &CancellationToken::new()).await;
        assert!(matches!(run.result, Err(TaskError::ExtractionFailure(_))));
        assert!(!run.stages.contains(&NavStage::Done));
    }

    fn login_site() -> SiteProfileConfig {
        SiteProfileConfig {
            login_url: Some("https://example.com/login".into()),
            login_username: Some("alice".into()),
            login_password: Some("hunter2".into()),
            login_username_field: "#user".into(),
            login_password_field: "#pass".into(),
            login_submit_button: "#submit".into(),
            login_success_marker: Some(".account".into()),
            ..quick_site()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_branch_fills_form_and_returns_to_task() {
        let script = playable()
            .element("#user")
            .element("#pass")
            .element("#submit")
            .reveal_on_click("#submit", ".account");
        let (run, driver) =
            run_once(script, login_site(), MockExtractor::new(), &CancellationToken::new()).await;

        assert!(run.result.is_ok(), "{:?}", run.result);
        assert_eq!(
            run.stages,
            vec![
                NavStage::Init,
                NavStage::Navigated,
                NavStage::LoginPending,
                NavStage::LoggedIn,
                NavStage::ControlLocated,
                NavStage::MediaResolved,
                NavStage::Done
            ]
        );

        let actions = driver.recorded_actions().await;
        let navigations: Vec<&str> = actions
            .iter()
            .filter_map(|a| match a {
                RecordedAction::Navigate { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            navigations,
            vec![TASK_URL, "https://example.com/login", TASK_URL]
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            RecordedAction::Fill { selector, value, .. } if selector == "#pass" && value == "hunter2"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_success_marker_is_login_failure() {
        let script = playable().element("#user").element("#pass").element("#submit");
        let (run, _) = run_once(script, login_site(), MockExtractor::new(), &CancellationToken::new()).await;
        assert!(matches!(run.result, Err(TaskError::LoginFailure(_))));
        assert_eq!(run.last_progress(), NavStage::LoginPending);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_login_field_is_login_failure() {
        let script = playable().element("#pass").element("#submit");
        let (run, _) = run_once(script, login_site(), MockExtractor::new(), &CancellationToken::new()).await;
        assert!(matches!(run.result, Err(TaskError::LoginFailure(_))));
    }

    fn stuck_login_page() -> PageScript {
        playable()
            .element("#user")
            .element("#pass")
            .element("#submit")
            .interaction_delay(Duration::from_secs(3600))
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_stuck_login_fill() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let (run, driver) = run_once(stuck_login_page(), login_site(), MockExtractor::new(), &cancel).await;

        assert_eq!(run.result.as_ref().unwrap_err(), &TaskError::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(run.last_progress(), NavStage::LoginPending);
        assert!(!run.session_reusable());
        let fills = driver
            .recorded_actions()
            .await
            .into_iter()
            .filter(|a| matches!(a, RecordedAction::Fill { .. }))
            .count();
        assert_eq!(fills, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_login_fill_times_out_as_login_failure() {
        let start = tokio::time::Instant::now();
        let (run, _) = run_once(
            stuck_login_page(),
            login_site(),
            MockExtractor::new(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(run.result, Err(TaskError::LoginFailure(_))), "{:?}", run.result);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_control_click_times_out() {
        let script = playable().interaction_delay(Duration::from_secs(3600));
        let (run, _) = run_once(script, quick_site(), MockExtractor::new(), &CancellationToken::new()).await;

        assert!(matches!(run.result, Err(TaskError::SelectorNotFound(_))), "{:?}", run.result);
        assert_eq!(run.last_progress(), NavStage::ControlLocated);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_navigation_discards_session() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        // control never appears, so the navigator is polling when cancelled
        let (run, _) = run_once(PageScript::new(), quick_site(), MockExtractor::new(), &cancel).await;
        assert_eq!(run.result.as_ref().unwrap_err(), &TaskError::Cancelled);
        assert_eq!(run.last_progress(), NavStage::Navigated);
        assert!(!run.session_reusable());
    }

    #[tokio::test(start_paused = true)]
    async fn human_delay_applies_before_navigation() {
        let site = SiteProfileConfig {
            human_delay_min: 2.0,
            human_delay_max: 2.0,
            ..quick_site()
        };
        let start = tokio::time::Instant::now();
        let (run, _) = run_once(playable(), site, MockExtractor::new(), &CancellationToken::new()).await;
        assert!(run.result.is_ok());
        // one pause before loading the page and one before clicking the control
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[test]
    fn same_page_ignores_trailing_slash_and_fragment() {
        assert!(same_page("https://a.com/x/", "https://a.com/x"));
        assert!(same_page("https://a.com/x#top", "https://a.com/x"));
        assert!(!same_page("https://a.com/x", "https://a.com/y"));
        assert!(!same_page("", "https://a.com/y"));
    }

    #[test]
    fn reusability_by_outcome() {
        let run = |stages: Vec<NavStage>, result| NavigationRun { stages, result };
        assert!(run(vec![NavStage::Init, NavStage::Failed], Err(TaskError::Cancelled)).session_reusable());
        assert!(!run(
            vec![NavStage::Init, NavStage::Navigated, NavStage::Failed],
            Err(TaskError::Cancelled)
        )
        .session_reusable());
        assert!(!run(
            vec![NavStage::Init, NavStage::Navigated, NavStage::Failed],
            Err(TaskError::SelectorNotFound("x".into()))
        )
        .session_reusable());
        assert!(!run(
            vec![NavStage::Init, NavStage::Failed],
            Err(TaskError::NavigationTimeout("x".into()))
        )
        .session_reusable());
        assert!(!run(
            vec![NavStage::Init, NavStage::Navigated, NavStage::LoginPending, NavStage::Failed],
            Err(TaskError::LoginFailure("x".into()))
        )
        .session_reusable());
        assert!(run(
            vec![NavStage::Init, NavStage::Navigated, NavStage::ControlLocated, NavStage::MediaResolved, NavStage::Done],
            Ok(PathBuf::from("/tmp/out/a.mp4"))
        )
        .session_reusable());
    }
}

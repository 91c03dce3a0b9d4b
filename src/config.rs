//! Configuration types for webvideo-dl
//!
//! The on-disk format is JSON. Every field has a default so an empty object `{}`
//! is a valid configuration. Durations are written as integer seconds.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

/// Main configuration for the download orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Site profiles keyed by hostname (a leading `www.` is ignored)
    #[serde(default)]
    pub sites: HashMap<String, SiteProfileConfig>,

    /// Profile used for hosts without an entry in `sites`
    ///
    /// When absent, a built-in profile with generic HTML5 video selectors is used.
    #[serde(default)]
    pub default_site: Option<SiteProfileConfig>,

    /// Directory extracted media is written to (default: "./downloads")
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Rotate the network identity through NordVPN (default: true)
    #[serde(default = "default_true")]
    pub nordvpn_enabled: bool,

    /// Lower bound of the random rotation interval (default: 300 seconds)
    #[serde(default = "default_rotation_min", with = "duration_serde")]
    pub ip_rotation_interval_min: Duration,

    /// Upper bound of the random rotation interval (default: 1800 seconds)
    #[serde(default = "default_rotation_max", with = "duration_serde")]
    pub ip_rotation_interval_max: Duration,

    /// Run the browser without a visible window (default: false)
    #[serde(default)]
    pub headless: bool,

    /// Navigation and selector timeout (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Maximum concurrent downloads, which is also the browser pool size (default: 3)
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Total attempts per task, including the first one (default: 3)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff between attempts
    #[serde(default)]
    pub retry: RetryConfig,

    /// User agents picked at random for each new browser context
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// How long a task waits for a free browser session (default: 600 seconds)
    #[serde(default = "default_session_acquire_timeout", with = "duration_serde")]
    pub session_acquire_timeout: Duration,

    /// Pause between selector probing rounds in milliseconds (default: 250)
    #[serde(default = "default_selector_poll_interval_ms")]
    pub selector_poll_interval_ms: u64,

    /// VPN control settings
    #[serde(default)]
    pub vpn: VpnConfig,

    /// Append result records to this JSON-lines file (None = no history)
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sites: HashMap::new(),
            default_site: None,
            output_directory: default_output_directory(),
            nordvpn_enabled: true,
            ip_rotation_interval_min: default_rotation_min(),
            ip_rotation_interval_max: default_rotation_max(),
            headless: false,
            timeout: default_timeout(),
            concurrent_downloads: default_concurrent_downloads(),
            retry_attempts: default_retry_attempts(),
            retry: RetryConfig::default(),
            user_agents: default_user_agents(),
            session_acquire_timeout: default_session_acquire_timeout(),
            selector_poll_interval_ms: default_selector_poll_interval_ms(),
            vpn: VpnConfig::default(),
            history_path: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a configuration from a JSON string
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid config JSON: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate global settings
    ///
    /// Site profiles are validated when the
    /// [`SiteProfileRegistry`](crate::profiles::SiteProfileRegistry) is built.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_downloads == 0 {
            return Err(Error::config(
                "must be at least 1",
                "concurrent_downloads",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(Error::config("must be at least 1", "retry_attempts"));
        }
        if self.ip_rotation_interval_min > self.ip_rotation_interval_max {
            return Err(Error::config(
                format!(
                    "minimum ({}s) exceeds maximum ({}s)",
                    self.ip_rotation_interval_min.as_secs(),
                    self.ip_rotation_interval_max.as_secs()
                ),
                "ip_rotation_interval_min",
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("must be greater than zero", "timeout"));
        }
        if self.user_agents.is_empty() {
            return Err(Error::config("at least one user agent is required", "user_agents"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.nordvpn_enabled && self.vpn.countries.is_empty() {
            return Err(Error::config(
                "at least one country is required when VPN rotation is enabled",
                "vpn.countries",
            ));
        }
        Ok(())
    }

    /// Interval between selector probing rounds
    pub fn selector_poll_interval(&self) -> Duration {
        Duration::from_millis(self.selector_poll_interval_ms.max(1))
    }
}

/// Per-site automation settings as written in the config file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteProfileConfig {
    /// Candidate selectors for the play control, tried in order
    #[serde(default, deserialize_with = "one_or_many")]
    pub video_button: Vec<String>,

    /// Candidate selectors for the download/media link, tried in order
    #[serde(default, deserialize_with = "one_or_many")]
    pub download_link: Vec<String>,

    /// Login page; the login step runs only when this is set
    #[serde(default)]
    pub login_url: Option<String>,

    /// Username submitted on the login page
    #[serde(default)]
    pub login_username: Option<String>,

    /// Password submitted on the login page
    #[serde(default)]
    pub login_password: Option<String>,

    /// Selector of the username input
    #[serde(default = "default_login_username_field")]
    pub login_username_field: String,

    /// Selector of the password input
    #[serde(default = "default_login_password_field")]
    pub login_password_field: String,

    /// Selector of the submit button
    #[serde(default = "default_login_submit_button")]
    pub login_submit_button: String,

    /// Settle time after submitting the login form (default: 3 seconds)
    #[serde(default = "default_wait_after_login", with = "duration_serde")]
    pub wait_after_login: Duration,

    /// Selector that must be present after login for it to count as successful
    #[serde(default)]
    pub login_success_marker: Option<String>,

    /// Lower bound of the randomized delay between interactive actions, in seconds
    #[serde(default = "default_human_delay_min")]
    pub human_delay_min: f64,

    /// Upper bound of the randomized delay between interactive actions, in seconds
    #[serde(default = "default_human_delay_max")]
    pub human_delay_max: f64,

    /// Extra HTTP headers sent by the browser and the extractor
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl Default for SiteProfileConfig {
    fn default() -> Self {
        Self {
            video_button: Vec::new(),
            download_link: Vec::new(),
            login_url: None,
            login_username: None,
            login_password: None,
            login_username_field: default_login_username_field(),
            login_password_field: default_login_password_field(),
            login_submit_button: default_login_submit_button(),
            wait_after_login: default_wait_after_login(),
            login_success_marker: None,
            human_delay_min: default_human_delay_min(),
            human_delay_max: default_human_delay_max(),
            custom_headers: HashMap::new(),
        }
    }
}

/// Backoff strategy between task attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// Delay multiplied by `backoff_multiplier` after every retry (default)
    #[default]
    Exponential,
}

/// Retry configuration for failed task attempts
///
/// The attempt budget itself is [`Config::retry_attempts`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff strategy (default: exponential)
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::default(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// VPN control settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VpnConfig {
    /// Countries picked at random on each rotation
    #[serde(default = "default_vpn_countries")]
    pub countries: Vec<String>,

    /// Path to the nordvpn executable (auto-detected if None)
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Timeout for a single VPN CLI invocation (default: 30 seconds)
    #[serde(default = "default_vpn_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,

    /// Disconnect the VPN when the orchestrator shuts down (default: true)
    #[serde(default = "default_true")]
    pub disconnect_on_shutdown: bool,

    /// Endpoint echoing the caller's public IP, queried after each rotation
    #[serde(default)]
    pub ip_check_url: Option<String>,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            countries: default_vpn_countries(),
            binary_path: None,
            command_timeout: default_vpn_command_timeout(),
            disconnect_on_shutdown: true,
            ip_check_url: None,
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_true() -> bool {
    true
}

fn default_rotation_min() -> Duration {
    Duration::from_secs(300)
}

fn default_rotation_max() -> Duration {
    Duration::from_secs(1800)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_concurrent_downloads() -> usize {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_session_acquire_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_selector_poll_interval_ms() -> u64 {
    250
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
    ]
}

fn default_login_username_field() -> String {
    "input[name='username'], input[type='email']".to_string()
}

fn default_login_password_field() -> String {
    "input[name='password'], input[type='password']".to_string()
}

fn default_login_submit_button() -> String {
    "button[type='submit'], input[type='submit']".to_string()
}

fn default_wait_after_login() -> Duration {
    Duration::from_secs(3)
}

fn default_human_delay_min() -> f64 {
    1.0
}

fn default_human_delay_max() -> f64 {
    3.0
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_vpn_countries() -> Vec<String> {
    ["US", "DE", "GB", "NL", "SE", "CH", "FR", "CA"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_vpn_command_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Accept either `"selector"` or `["a", "b"]`
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

//! Site profile registry
//!
//! Maps a hostname to the [`SiteProfile`] that tells the navigator how to drive
//! that site. Profiles are validated once when the registry is built and are
//! immutable afterwards; lookups hand out cheap `Arc` clones.

use crate::config::{Config, SiteProfileConfig};
use crate::error::{Error, Result};
use crate::utils::{host_of, normalize_host};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Play-control selectors of the built-in default profile
const GENERIC_VIDEO_BUTTON: &[&str] = &[
    "button[aria-label*='play' i]",
    ".play-button",
    ".vjs-big-play-button",
    "video",
];

/// Media-link selectors of the built-in default profile
const GENERIC_DOWNLOAD_LINK: &[&str] = &[
    "video source[src]",
    "video[src]",
    "a[href$='.mp4']",
    "a[download]",
];

/// Login block of a site profile
#[derive(Clone, Debug, PartialEq)]
pub struct LoginProfile {
    /// Page holding the login form
    pub url: String,
    /// Submitted username
    pub username: String,
    /// Submitted password
    pub password: String,
    /// Selector of the username input
    pub username_field: String,
    /// Selector of the password input
    pub password_field: String,
    /// Selector of the submit control
    pub submit_button: String,
    /// Settle time after submitting
    pub wait_after: Duration,
    /// Selector proving the login succeeded
    pub success_marker: Option<String>,
}

/// Validated per-site automation settings
#[derive(Clone, Debug, PartialEq)]
pub struct SiteProfile {
    /// Normalized host this profile is registered for (`None` for the default profile)
    pub host: Option<String>,
    /// Play-control selectors in priority order (never empty)
    pub video_button: Vec<String>,
    /// Media-link selectors in priority order (never empty)
    pub download_link: Vec<String>,
    /// Optional login step
    pub login: Option<LoginProfile>,
    /// Lower bound of the randomized pause before interactive actions
    pub human_delay_min: Duration,
    /// Upper bound of the randomized pause before interactive actions
    pub human_delay_max: Duration,
    /// Extra HTTP headers
    pub custom_headers: HashMap<String, String>,
}

impl SiteProfile {
    /// Validate a raw profile from the config file
    ///
    /// `key` is the config path used in error messages (e.g. `sites.example.com`).
    pub fn from_config(host: Option<String>, raw: &SiteProfileConfig, key: &str) -> Result<Self> {
        let video_button = non_empty_selectors(&raw.video_button, &format!("{key}.video_button"))?;
        let download_link =
            non_empty_selectors(&raw.download_link, &format!("{key}.download_link"))?;

        if !raw.human_delay_min.is_finite()
            || !raw.human_delay_max.is_finite()
            || raw.human_delay_min < 0.0
        {
            return Err(Error::config(
                "human delays must be finite non-negative seconds",
                format!("{key}.human_delay_min"),
            ));
        }
        if raw.human_delay_min > raw.human_delay_max {
            return Err(Error::config(
                format!(
                    "minimum ({}) exceeds maximum ({})",
                    raw.human_delay_min, raw.human_delay_max
                ),
                format!("{key}.human_delay_min"),
            ));
        }

        let login = match &raw.login_url {
            None => None,
            Some(url) => {
                if url::Url::parse(url).is_err() {
                    return Err(Error::config(
                        format!("'{url}' is not an absolute URL"),
                        format!("{key}.login_url"),
                    ));
                }
                let (Some(username), Some(password)) = (&raw.login_username, &raw.login_password)
                else {
                    return Err(Error::config(
                        "login_url requires login_username and login_password",
                        format!("{key}.login_url"),
                    ));
                };
                Some(LoginProfile {
                    url: url.clone(),
                    username: username.clone(),
                    password: password.clone(),
                    username_field: raw.login_username_field.clone(),
                    password_field: raw.login_password_field.clone(),
                    submit_button: raw.login_submit_button.clone(),
                    wait_after: raw.wait_after_login,
                    success_marker: raw.login_success_marker.clone(),
                })
            }
        };

        Ok(Self {
            host,
            video_button,
            download_link,
            login,
            human_delay_min: Duration::from_secs_f64(raw.human_delay_min),
            human_delay_max: Duration::from_secs_f64(raw.human_delay_max),
            custom_headers: raw.custom_headers.clone(),
        })
    }

    /// Built-in profile with generic HTML5 video selectors
    pub fn generic() -> Self {
        let defaults = SiteProfileConfig::default();
        Self {
            host: None,
            video_button: GENERIC_VIDEO_BUTTON.iter().map(|s| s.to_string()).collect(),
            download_link: GENERIC_DOWNLOAD_LINK.iter().map(|s| s.to_string()).collect(),
            login: None,
            human_delay_min: Duration::from_secs_f64(defaults.human_delay_min),
            human_delay_max: Duration::from_secs_f64(defaults.human_delay_max),
            custom_headers: HashMap::new(),
        }
    }

    /// True if this is the fallback profile rather than a per-host one
    pub fn is_default(&self) -> bool {
        self.host.is_none()
    }
}

fn non_empty_selectors(selectors: &[String], key: &str) -> Result<Vec<String>> {
    let cleaned: Vec<String> = selectors
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err(Error::config("selector sequence must not be empty", key));
    }
    Ok(cleaned)
}

/// Hostname to profile lookup with a default fallback
#[derive(Clone, Debug)]
pub struct SiteProfileRegistry {
    profiles: HashMap<String, Arc<SiteProfile>>,
    default: Arc<SiteProfile>,
}

impl SiteProfileRegistry {
    /// Build and validate every profile declared in the config
    ///
    /// Fails with [`Error::Config`] naming the offending key when any profile has
    /// an empty selector sequence, inverted delay bounds or an incomplete login block.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut profiles = HashMap::with_capacity(config.sites.len());

        for (raw_host, raw) in &config.sites {
            let host = normalize_host(raw_host);
            if host.is_empty() {
                return Err(Error::config("empty hostname", "sites"));
            }
            let profile = SiteProfile::from_config(Some(host.clone()), raw, &format!("sites.{raw_host}"))?;
            if profiles.insert(host.clone(), Arc::new(profile)).is_some() {
                return Err(Error::config(
                    format!("'{host}' is declared more than once"),
                    format!("sites.{raw_host}"),
                ));
            }
        }

        let default = match &config.default_site {
            Some(raw) => SiteProfile::from_config(None, raw, "default_site")?,
            None => SiteProfile::generic(),
        };

        tracing::debug!(
            profiles = profiles.len(),
            custom_default = config.default_site.is_some(),
            "site profile registry built"
        );

        Ok(Self {
            profiles,
            default: Arc::new(default),
        })
    }

    /// Profile for a hostname, falling back to the default profile
    pub fn resolve(&self, host: &str) -> Arc<SiteProfile> {
        let host = normalize_host(host);
        match self.profiles.get(&host) {
            Some(profile) => Arc::clone(profile),
            None => Arc::clone(&self.default),
        }
    }

    /// Profile for the host of a URL, `None` when the URL has no host
    pub fn resolve_url(&self, url: &str) -> Option<(String, Arc<SiteProfile>)> {
        let host = host_of(url)?;
        let profile = self.resolve(&host);
        Some((host, profile))
    }

    /// The fallback profile
    pub fn default_profile(&self) -> Arc<SiteProfile> {
        Arc::clone(&self.default)
    }

    /// Number of per-host profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// True when only the default profile exists
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn site(video: &[&str], download: &[&str]) -> SiteProfileConfig {
        SiteProfileConfig {
            video_button: video.iter().map(|s| s.to_string()).collect(),
            download_link: download.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn config_with(sites: Vec<(&str, SiteProfileConfig)>) -> Config {
        Config {
            sites: sites.into_iter().map(|(h, s)| (h.to_string(), s)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_exact_host_after_normalization() {
        let config = config_with(vec![("www.example.com", site(&[".play"], &["video"]))]);
        let registry = SiteProfileRegistry::from_config(&config).unwrap();

        let profile = registry.resolve("EXAMPLE.com");
        assert_eq!(profile.host.as_deref(), Some("example.com"));
        assert_eq!(profile.video_button, vec![".play".to_string()]);

        let (host, profile) = registry
            .resolve_url("https://www.example.com/watch/1")
            .unwrap();
        assert_eq!(host, "example.com");
        assert!(!profile.is_default());
    }

    #[test]
    fn unknown_host_falls_back_to_default() {
        let config = config_with(vec![("example.com", site(&[".play"], &["video"]))]);
        let registry = SiteProfileRegistry::from_config(&config).unwrap();

        let profile = registry.resolve("unknown.org");
        assert!(profile.is_default());
        assert!(Arc::ptr_eq(&profile, &registry.default_profile()));
        // subdomains are distinct hosts
        assert!(registry.resolve("videos.example.com").is_default());
    }

    #[test]
    fn custom_default_profile_replaces_builtin() {
        let mut config = Config::default();
        config.default_site = Some(site(&["#player"], &["#player source"]));
        let registry = SiteProfileRegistry::from_config(&config).unwrap();

        let profile = registry.resolve("anything.net");
        assert_eq!(profile.video_button, vec!["#player".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn builtin_default_has_selectors() {
        let registry = SiteProfileRegistry::from_config(&Config::default()).unwrap();
        let profile = registry.default_profile();
        assert!(!profile.video_button.is_empty());
        assert!(!profile.download_link.is_empty());
        assert!(profile.login.is_none());
    }

    #[test]
    fn empty_selector_sequence_is_config_error() {
        let config = config_with(vec![("example.com", site(&[], &["video"]))]);
        match SiteProfileRegistry::from_config(&config) {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("sites.example.com.video_button"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }

        let config = config_with(vec![("example.com", site(&[".play"], &["  "]))]);
        match SiteProfileRegistry::from_config(&config) {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("sites.example.com.download_link"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn empty_default_profile_is_config_error() {
        let mut config = Config::default();
        config.default_site = Some(SiteProfileConfig::default());
        match SiteProfileRegistry::from_config(&config) {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("default_site.video_button"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn inverted_delays_rejected() {
        let mut raw = site(&[".play"], &["video"]);
        raw.human_delay_min = 5.0;
        raw.human_delay_max = 1.0;
        let config = config_with(vec![("example.com", raw)]);
        assert!(matches!(
            SiteProfileRegistry::from_config(&config),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn login_requires_credentials() {
        let mut raw = site(&[".play"], &["video"]);
        raw.login_url = Some("https://example.com/login".into());
        raw.login_username = Some("user".into());
        let config = config_with(vec![("example.com", raw.clone())]);
        match SiteProfileRegistry::from_config(&config) {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("sites.example.com.login_url"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }

        raw.login_password = Some("secret".into());
        let config = config_with(vec![("example.com", raw)]);
        let registry = SiteProfileRegistry::from_config(&config).unwrap();
        let login = registry.resolve("example.com").login.clone().unwrap();
        assert_eq!(login.username, "user");
        assert_eq!(login.password, "secret");
        assert_eq!(login.wait_after, Duration::from_secs(3));
    }

    #[test]
    fn duplicate_hosts_after_normalization_rejected() {
        let config = config_with(vec![
            ("example.com", site(&[".a"], &["video"])),
            ("www.example.com", site(&[".b"], &["video"])),
        ]);
        assert!(matches!(
            SiteProfileRegistry::from_config(&config),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn selector_order_is_preserved() {
        let config = config_with(vec![(
            "example.com",
            site(&[".first", ".second", ".third"], &["video"]),
        )]);
        let registry = SiteProfileRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.resolve("example.com").video_button,
            vec![".first", ".second", ".third"]
        );
    }
}

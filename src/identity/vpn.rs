//! VPN control collaborators
//!
//! The identity scheduler decides *when* to rotate; a [`VpnControl`] decides
//! *how*. Implementations:
//!
//! - [`NordVpnControl`]: shells out to the `nordvpn` command-line client
//! - [`DisabledVpn`]: does nothing, used when rotation is turned off
//!
//! [`PublicIpProbe`] is an optional helper that asks an echo endpoint for the
//! current public address so rotations can be confirmed in the logs.

use crate::config::VpnConfig;
use crate::error::{Error, Result};
use crate::utils::random_duration;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Default endpoint of [`PublicIpProbe`]
pub const DEFAULT_IP_CHECK_URL: &str = "https://httpbin.org/ip";

/// Connection state reported by a VPN client
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnStatus {
    /// Whether a tunnel is up
    pub connected: bool,
    /// Country of the current server
    pub country: Option<String>,
    /// Hostname of the current server
    pub server: Option<String>,
    /// Address reported by the client
    pub ip: Option<String>,
}

/// Changes the outbound network identity
#[async_trait]
pub trait VpnControl: Send + Sync {
    /// Switch to a new identity
    ///
    /// Returns once the new identity is usable. Errors are reported as
    /// [`Error::VpnRotation`] and never reach download tasks.
    async fn rotate_identity(&self) -> Result<()>;

    /// Current connection state
    async fn status(&self) -> Result<VpnStatus>;

    /// Drop the tunnel
    async fn disconnect(&self) -> Result<()>;

    /// Name of the implementation for logging
    fn name(&self) -> &'static str;
}

/// No-op VPN control used when rotation is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledVpn;

#[async_trait]
impl VpnControl for DisabledVpn {
    async fn rotate_identity(&self) -> Result<()> {
        Ok(())
    }

    async fn status(&self) -> Result<VpnStatus> {
        Ok(VpnStatus::default())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// NordVPN command-line client
///
/// A rotation disconnects, pauses briefly, connects to a random country from
/// the configured list and waits for the tunnel to settle.
///
/// # Examples
///
/// ```no_run
/// use webvideo_dl::config::VpnConfig;
/// use webvideo_dl::identity::vpn::{NordVpnControl, VpnControl};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let vpn = NordVpnControl::from_path(&VpnConfig::default())
///     .expect("nordvpn not found in PATH");
/// vpn.rotate_identity().await?;
/// println!("{:?}", vpn.status().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NordVpnControl {
    binary_path: PathBuf,
    countries: Vec<String>,
    command_timeout: Duration,
    disconnect_pause: (Duration, Duration),
    settle_pause: (Duration, Duration),
}

impl NordVpnControl {
    /// Create a control for an explicit binary
    pub fn new(binary_path: PathBuf, config: &VpnConfig) -> Self {
        Self {
            binary_path,
            countries: config.countries.clone(),
            command_timeout: config.command_timeout,
            disconnect_pause: (Duration::from_secs(1), Duration::from_secs(3)),
            settle_pause: (Duration::from_secs(2), Duration::from_secs(5)),
        }
    }

    /// Use `vpn.binary_path` if set, otherwise look for `nordvpn` in PATH
    pub fn from_path(config: &VpnConfig) -> Option<Self> {
        match &config.binary_path {
            Some(path) => Some(Self::new(path.clone(), config)),
            None => which::which("nordvpn")
                .ok()
                .map(|path| Self::new(path, config)),
        }
    }

    /// Override the pauses around reconnecting
    pub fn with_pauses(
        mut self,
        disconnect_pause: (Duration, Duration),
        settle_pause: (Duration, Duration),
    ) -> Self {
        self.disconnect_pause = disconnect_pause;
        self.settle_pause = settle_pause;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.binary_path);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| {
                Error::ExternalTool(format!(
                    "nordvpn {} timed out after {:?}",
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| Error::ExternalTool(format!("Failed to execute nordvpn: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalTool(format!(
                "nordvpn {} exited with {}: {}",
                args.join(" "),
                output.status,
                if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl VpnControl for NordVpnControl {
    async fn rotate_identity(&self) -> Result<()> {
        let country = self
            .countries
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::VpnRotation("no countries configured".into()))?;

        if let Err(e) = self.run(&["disconnect"]).await {
            // Not being connected is fine; the connect below decides success
            tracing::debug!(error = %e, "nordvpn disconnect before rotation failed");
        }
        tokio::time::sleep(random_duration(self.disconnect_pause.0, self.disconnect_pause.1)).await;

        self.run(&["connect", &country])
            .await
            .map_err(|e| Error::VpnRotation(format!("connect to {} failed: {}", country, e)))?;
        tracing::info!(country = %country, "connected to new VPN server");

        tokio::time::sleep(random_duration(self.settle_pause.0, self.settle_pause.1)).await;
        Ok(())
    }

    async fn status(&self) -> Result<VpnStatus> {
        let output = self.run(&["status"]).await?;
        Ok(parse_status(&output))
    }

    async fn disconnect(&self) -> Result<()> {
        self.run(&["disconnect"]).await?;
        tracing::info!("VPN disconnected");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "nordvpn"
    }
}

/// Parse the `Key: value` output of `nordvpn status`
pub fn parse_status(output: &str) -> VpnStatus {
    let mut status = VpnStatus::default();
    for line in output.lines() {
        // the client prefixes output with spinner characters
        let line = line.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "status" => status.connected = value.eq_ignore_ascii_case("connected"),
            "country" => status.country = Some(value.to_string()),
            "hostname" | "current server" => status.server = Some(value.to_string()),
            "ip" | "your new ip" => status.ip = Some(value.to_string()),
            _ => {}
        }
    }
    status
}

#[derive(Deserialize)]
struct IpEcho {
    origin: String,
}

/// Looks up the current public address through an echo endpoint
#[derive(Debug, Clone)]
pub struct PublicIpProbe {
    client: reqwest::Client,
    url: String,
}

impl PublicIpProbe {
    /// Probe against `url` (expects `{"origin": "<ip>"}` or a plain-text body)
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Current public IP address
    pub async fn current_ip(&self) -> Result<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let ip = match serde_json::from_str::<IpEcho>(&body) {
            Ok(echo) => echo.origin,
            Err(_) => body.trim().to_string(),
        };
        if ip.is_empty() {
            return Err(Error::ExternalTool(format!("{} returned an empty body", self.url)));
        }
        Ok(ip)
    }
}

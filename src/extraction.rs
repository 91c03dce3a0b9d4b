//! Media extraction
//!
//! Once the navigator knows the media URL it hands an [`ExtractionRequest`] to an
//! [`ExtractionEngine`], which downloads the media and returns the path of the
//! finished file. Implementations:
//!
//! - [`YtDlpExtractor`]: runs the external `yt-dlp` binary
//! - [`UnavailableExtractor`]: always fails, used when `yt-dlp` is not installed

use crate::error::ExtractionError;
use crate::utils::{is_video_file, safe_filename, unique_stem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Format selector passed to yt-dlp (best stream up to 1080p)
pub const DEFAULT_FORMAT: &str = "best[height<=1080]/best";

/// Everything an extractor needs to fetch one media item
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionRequest {
    /// Resolved media URL
    pub media_url: String,
    /// Page the media was found on (sent as referer)
    pub page_url: String,
    /// Normalized host of the task URL
    pub host: String,
    /// Page title, used in the output file name when known
    pub title: Option<String>,
    /// Directory receiving the file
    pub output_dir: PathBuf,
    /// Extra HTTP headers from the site profile
    pub headers: HashMap<String, String>,
}

/// Downloads a resolved media URL to disk
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Fetch the media and return the path of the finished file
    async fn extract(&self, request: &ExtractionRequest) -> Result<PathBuf, ExtractionError>;

    /// Name of the implementation for logging
    fn name(&self) -> &'static str;
}

/// Extractor used when no backend is available
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableExtractor;

#[async_trait]
impl ExtractionEngine for UnavailableExtractor {
    async fn extract(&self, _request: &ExtractionRequest) -> Result<PathBuf, ExtractionError> {
        Err(ExtractionError::Unavailable(
            "yt-dlp not found in PATH".into(),
        ))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Extractor backed by the `yt-dlp` command-line tool
///
/// Files are named `<domain>_<title-or-timestamp>.<ext>`, an info JSON is
/// written next to each file, and the final path is taken from yt-dlp's
/// `after_move:filepath` output (falling back to a directory scan).
///
/// # Examples
///
/// ```no_run
/// use webvideo_dl::extraction::{ExtractionEngine, ExtractionRequest, YtDlpExtractor};
/// use std::collections::HashMap;
/// use std::path::PathBuf;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let extractor = YtDlpExtractor::from_path().expect("yt-dlp not found in PATH");
/// let path = extractor
///     .extract(&ExtractionRequest {
///         media_url: "https://cdn.example.com/v/42.mp4".into(),
///         page_url: "https://example.com/watch/42".into(),
///         host: "example.com".into(),
///         title: Some("Episode 42".into()),
///         output_dir: PathBuf::from("./downloads"),
///         headers: HashMap::new(),
///     })
///     .await?;
/// println!("saved to {}", path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary_path: PathBuf,
    format: String,
}

impl YtDlpExtractor {
    /// Create an extractor with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            format: DEFAULT_FORMAT.to_string(),
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Override the format selector
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    fn build_command(&self, request: &ExtractionRequest, template: &Path) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-f")
            .arg(&self.format)
            .arg("-o")
            .arg(template)
            .arg("--write-info-json")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--referer")
            .arg(&request.page_url);

        let mut headers: Vec<_> = request.headers.iter().collect();
        headers.sort();
        for (name, value) in headers {
            command.arg("--add-header").arg(format!("{}:{}", name, value));
        }

        command.arg(&request.media_url).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ExtractionEngine for YtDlpExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<PathBuf, ExtractionError> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| {
                ExtractionError::Failed(format!(
                    "cannot create {}: {}",
                    request.output_dir.display(),
                    e
                ))
            })?;

        let stem = unique_stem(
            &request.output_dir,
            &safe_filename(&request.host, request.title.as_deref()),
        )
        .map_err(|e| ExtractionError::Failed(e.to_string()))?;
        let template = request.output_dir.join(format!("{stem}.%(ext)s"));

        tracing::debug!(
            media_url = %request.media_url,
            output = %template.display(),
            "running yt-dlp"
        );

        let output = self
            .build_command(request, &template)
            .output()
            .await
            .map_err(|e| ExtractionError::Unavailable(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no error output")
                .trim()
                .to_string();
            return Err(ExtractionError::Failed(format!(
                "yt-dlp exited with {}: {}",
                output.status, reason
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(printed) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            let path = PathBuf::from(printed);
            if path.is_file() {
                return Ok(path);
            }
        }

        find_output(&request.output_dir, &stem)
            .ok_or_else(|| ExtractionError::NoOutput(request.media_url.clone()))
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Video file in `dir` whose stem is `stem`
fn find_output(dir: &Path, stem: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            is_video_file(p) && p.file_stem().and_then(|s| s.to_str()) == Some(stem)
        })
}

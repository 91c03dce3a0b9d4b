//! Utility functions for host names, URLs and output file naming

use rand::Rng;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Longest file stem produced by [`safe_filename`]
pub const MAX_FILENAME_LEN: usize = 100;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Extensions treated as finished video files
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi"];

/// Normalize a host name for profile lookup
///
/// Lower-cases the host, strips a trailing dot and a single leading `www.`.
///
/// # Examples
///
/// ```
/// use webvideo_dl::utils::normalize_host;
///
/// assert_eq!(normalize_host("WWW.Example.COM"), "example.com");
/// assert_eq!(normalize_host("cdn.example.com."), "cdn.example.com");
/// ```
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lower,
    }
}

/// Pick a duration uniformly within `[min, max]`
///
/// Used for human-like pauses and rotation deadlines. Inverted bounds yield `min`.
pub fn random_duration(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Extract the normalized host from a URL, `None` if the URL has no host
pub fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(normalize_host(host))
}

/// Resolve a media reference read from the page against the page URL
///
/// Absolute references are returned unchanged; relative ones (`/v/1.mp4`,
/// `clip.webm`, `//cdn.example.com/a.mp4`) are joined onto `page_url`.
/// Returns `None` for empty references or when the page URL cannot be parsed.
pub fn resolve_media_url(page_url: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if let Ok(absolute) = url::Url::parse(reference) {
        return Some(absolute.to_string());
    }
    let base = url::Url::parse(page_url).ok()?;
    base.join(reference).ok().map(|u| u.to_string())
}

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").unwrap_or_else(|_| unreachable!()))
}

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-\s]+").unwrap_or_else(|_| unreachable!()))
}

/// Build a filesystem-safe file stem for a download
///
/// The stem is `<domain>_<title>`, falling back to a UTC timestamp when no
/// title is known. Everything but word characters, whitespace and dashes is
/// removed, runs of whitespace/dashes collapse to a single `-`, and the result
/// is truncated to [`MAX_FILENAME_LEN`] characters.
///
/// # Examples
///
/// ```
/// use webvideo_dl::utils::safe_filename;
///
/// assert_eq!(
///     safe_filename("example.com", Some("My Video: Part 1!")),
///     "examplecom_My-Video-Part-1"
/// );
/// ```
#[must_use]
pub fn safe_filename(domain: &str, title: Option<&str>) -> String {
    let title = match title.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string(),
    };
    let raw = format!("{domain}_{title}");
    let cleaned = invalid_chars().replace_all(&raw, "");
    let collapsed = separators().replace_all(cleaned.trim(), "-");
    collapsed.chars().take(MAX_FILENAME_LEN).collect()
}

/// Check whether a path has one of the [`VIDEO_EXTENSIONS`]
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Pick a stem that no existing file in `dir` uses yet
///
/// Tries `stem`, then `stem (1)`, `stem (2)`, ... and compares against the
/// stems of files already present, whatever their extension.
pub fn unique_stem(dir: &Path, stem: &str) -> std::io::Result<String> {
    let taken: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                PathBuf::from(e.file_name())
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| {
                        // "name.info.json" -> "name"
                        s.strip_suffix(".info").unwrap_or(s).to_string()
                    })
            })
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stem.to_string()),
        Err(e) => return Err(e),
    };

    if !taken.iter().any(|t| t == stem) {
        return Ok(stem.to_string());
    }

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = format!("{stem} ({i})");
        if !taken.iter().any(|t| *t == candidate) {
            return Ok(candidate);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("could not find a unique name for {stem} after {MAX_RENAME_ATTEMPTS} attempts"),
    ))
}

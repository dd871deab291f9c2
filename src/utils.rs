//! Utility functions for string handling, URL inspection and file system checks.
//!
//! - String truncation and slugification for logs and output file names
//! - JSON error detection for handling LLM response truncation
//! - Funding keyword matching used by discovery scoring and the extraction pre-filter
//! - Host and registrable-domain helpers shared by discovery, fetch and dedup
//! - File system validation for output directories

use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes, on a character boundary, with
/// an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let head = snippet(s, max);
    if head.len() == s.len() {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", head, s.len() - head.len())
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn snippet(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the model's response is cut off by a token limit the JSON fails with
/// an EOF error. Such responses are worth asking for again.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Convert a name to a file-name friendly slug.
///
/// Lowercases, keeps alphanumerics, and joins the remaining words with single
/// hyphens.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Lowercase terms that signal a funding announcement.
pub const FUNDING_KEYWORDS: &[&str] = &[
    "raises",
    "raised",
    "funding",
    "fundraise",
    "seed round",
    "pre-seed",
    "series a",
    "series b",
    "series c",
    "venture",
    "investors",
    "investment",
    "led by",
    "secures",
    "backed",
];

/// Number of distinct funding keywords present in `text`.
pub fn funding_keyword_hits(text: &str) -> usize {
    let lower = text.to_lowercase();
    FUNDING_KEYWORDS.iter().filter(|k| lower.contains(*k)).count()
}

/// Lowercased host of `url`, if it parses and has one.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

// Second-level labels under which registrations happen one level deeper
// (`bbc.co.uk`, `abc.net.au`).
const SECOND_LEVEL: &[&str] = &["co", "com", "net", "org", "gov", "ac", "edu"];

/// Registrable domain of a host: `news.techcrunch.com` -> `techcrunch.com`,
/// `www.bbc.co.uk` -> `bbc.co.uk`.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 || host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    let n = labels.len();
    let keep = if labels[n - 1].len() == 2 && SECOND_LEVEL.contains(&labels[n - 2]) {
        3
    } else {
        2
    };
    labels[n - keep.min(n)..].join(".")
}

/// True when two hosts belong to the same site, ignoring a `www.` prefix.
pub fn same_site(a: &str, b: &str) -> bool {
    a.trim_start_matches("www.").eq_ignore_ascii_case(b.trim_start_matches("www."))
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

//! Anti-bot response classification.
//!
//! Pure functions over `(status, headers, body)`; no I/O happens here.

use std::collections::HashMap;
use thiserror::Error;

/// Only this much of the body is scanned for challenge markers.
const SNIPPET_BYTES: usize = 8 * 1024;

/// Lowercase substrings left by CAPTCHA pages and anti-bot vendors.
const CHALLENGE_MARKERS: &[&str] = &[
    "captcha",
    "g-recaptcha",
    "hcaptcha",
    "cf-chl-",
    "challenge-platform",
    "just a moment...",
    "are you a robot",
    "verify you are human",
    "px-captcha",
    "perimeterx",
    "datadome",
    "distil_r_blocked",
    "incapsula incident",
    "access denied",
    "bot detected",
    "security check",
    "suspicious activity",
    "temporarily blocked",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockReason {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("challenge header {0}")]
    ChallengeHeader(String),

    #[error("challenge marker {0:?} in body")]
    Marker(&'static str),

    #[error("article body only {bytes} bytes")]
    TooShort { bytes: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Servable,
    Blocked(BlockReason),
}

#[derive(Debug, Clone, Copy)]
pub struct BotDetector {
    min_article_bytes: usize,
}

impl Default for BotDetector {
    fn default() -> Self {
        Self::new(512)
    }
}

impl BotDetector {
    pub fn new(min_article_bytes: usize) -> Self {
        Self { min_article_bytes }
    }

    /// Classify a response that is expected to carry an article.
    pub fn classify(&self, status: u16, headers: &HashMap<String, String>, body: &str) -> Verdict {
        match self.classify_resource(status, headers, body) {
            Verdict::Servable => {}
            blocked => return blocked,
        }
        let is_html = headers
            .get("content-type")
            .is_none_or(|ct| ct.to_ascii_lowercase().contains("html"));
        let bytes = body.trim().len();
        if (200..300).contains(&status) && is_html && bytes < self.min_article_bytes {
            return Verdict::Blocked(BlockReason::TooShort { bytes });
        }
        Verdict::Servable
    }

    /// Classify a response for a non-article resource (sitemaps, robots.txt,
    /// listing pages) where short bodies are normal.
    pub fn classify_resource(&self, status: u16, headers: &HashMap<String, String>, body: &str) -> Verdict {
        if status == 403 || status == 429 {
            return Verdict::Blocked(BlockReason::Status(status));
        }
        if headers
            .get("cf-mitigated")
            .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
        {
            return Verdict::Blocked(BlockReason::ChallengeHeader("cf-mitigated".to_string()));
        }
        if headers.contains_key("x-amzn-waf-action") {
            return Verdict::Blocked(BlockReason::ChallengeHeader("x-amzn-waf-action".to_string()));
        }
        let snippet = crate::utils::snippet(body, SNIPPET_BYTES).to_lowercase();
        if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| snippet.contains(*m)) {
            return Verdict::Blocked(BlockReason::Marker(marker));
        }
        Verdict::Servable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_body() -> String {
        format!("<html><body><article>{}</article></body></html>", "Funding news. ".repeat(100))
    }

    #[test]
    fn test_403_with_captcha_is_blocked() {
        let detector = BotDetector::default();
        let verdict = detector.classify(
            403,
            &HashMap::new(),
            "<html><div class=\"g-recaptcha\">Please complete the CAPTCHA</div></html>",
        );
        assert_eq!(verdict, Verdict::Blocked(BlockReason::Status(403)));
    }

    #[test]
    fn test_challenge_marker_on_200_is_blocked() {
        let detector = BotDetector::default();
        let body = format!("<title>Just a moment...</title>{}", article_body());
        assert!(matches!(
            detector.classify(200, &HashMap::new(), &body),
            Verdict::Blocked(BlockReason::Marker(_))
        ));
    }

    #[test]
    fn test_vendor_header_is_blocked() {
        let detector = BotDetector::default();
        let headers = HashMap::from([("cf-mitigated".to_string(), "challenge".to_string())]);
        assert_eq!(
            detector.classify(200, &headers, &article_body()),
            Verdict::Blocked(BlockReason::ChallengeHeader("cf-mitigated".into()))
        );
    }

    #[test]
    fn test_small_html_body_is_blocked_only_for_articles() {
        let detector = BotDetector::new(512);
        let headers = HashMap::from([("content-type".to_string(), "text/html; charset=utf-8".to_string())]);
        assert!(matches!(
            detector.classify(200, &headers, "<html></html>"),
            Verdict::Blocked(BlockReason::TooShort { .. })
        ));
        assert_eq!(detector.classify_resource(200, &headers, "<html></html>"), Verdict::Servable);
    }

    #[test]
    fn test_normal_article_is_servable() {
        let detector = BotDetector::default();
        assert_eq!(detector.classify(200, &HashMap::new(), &article_body()), Verdict::Servable);
        // Non-block failures are left to the fetcher's status handling.
        assert_eq!(detector.classify(503, &HashMap::new(), "oops"), Verdict::Servable);
    }

    #[test]
    fn test_markers_beyond_snippet_are_ignored() {
        let detector = BotDetector::default();
        let body = format!("{}captcha", "a".repeat(SNIPPET_BYTES + 10));
        assert_eq!(detector.classify(200, &HashMap::new(), &body), Verdict::Servable);
    }
}

//! Anchor extraction and article-URL heuristics shared by the HTML tiers.
//!
//! Everything here is synchronous: `scraper::Html` is not `Send`, so documents
//! are parsed and dropped before any `.await`.

use crate::models::DateRange;
use crate::utils::{funding_keyword_hits, same_site};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

static URL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/((?:19|20)\d{2})/(\d{1,2})/(\d{1,2})(?:/|$|[-_])").unwrap());

const NON_ARTICLE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "pdf", "zip", "gz", "css", "js", "json",
    "xml", "rss", "mp3", "mp4", "mov", "avi",
];

const EXCLUDED_SEGMENTS: &[&str] = &[
    "tag", "tags", "category", "categories", "author", "authors", "page", "search", "about",
    "contact", "privacy", "terms", "login", "signin", "signup", "subscribe", "feed", "events",
    "careers", "jobs", "advertise",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub url: Url,
    pub text: String,
}

/// Every `http(s)` anchor in `html`, resolved against `base`, fragment
/// stripped, first occurrence kept, in document order.
pub fn extract_anchors(base: &Url, html: &str) -> Vec<Anchor> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut anchors = Vec::new();
    for element in document.select(&ANCHOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href.trim()) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        url.set_fragment(None);
        if !seen.insert(url.to_string()) {
            continue;
        }
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        anchors.push(Anchor { url, text });
    }
    anchors
}

/// Path depth of at least two, no asset extension, no listing-only segments.
pub fn has_article_shape(url: &Url) -> bool {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return false;
    }
    let asset = segments
        .last()
        .and_then(|last| last.rsplit_once('.'))
        .is_some_and(|(_, ext)| NON_ARTICLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if asset {
        return false;
    }
    if segments
        .iter()
        .any(|s| EXCLUDED_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
    {
        return false;
    }
    !url.query_pairs().any(|(k, _)| k == "page" || k == "s")
}

/// Article-shaped and on the same site as `root`.
pub fn looks_like_article(url: &Url, root: &Url) -> bool {
    match (url.host_str(), root.host_str()) {
        (Some(a), Some(b)) => same_site(a, b) && has_article_shape(url),
        _ => false,
    }
}

/// `/YYYY/MM/DD/` embedded in the path.
pub fn date_from_url(url: &str) -> Option<NaiveDate> {
    let caps = URL_DATE.captures(url)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

/// Keep URLs whose embedded date (if any) lies in `range`.
pub fn in_range(url: &Url, range: &DateRange) -> bool {
    range.admits(date_from_url(url.as_str()))
}

/// True when the path equals one of `patterns` or sits directly under it.
pub fn matches_listing_pattern(url: &Url, patterns: &[String]) -> bool {
    let path = url.path().trim_end_matches('/').to_ascii_lowercase();
    patterns.iter().any(|p| {
        let p = p.trim_end_matches('/').to_ascii_lowercase();
        path == p || (path.starts_with(&format!("{p}/")) && path.matches('/').count() <= 2)
    })
}

/// Keyword score of an anchor for deep traversal.
pub fn anchor_score(anchor: &Anchor) -> usize {
    funding_keyword_hits(&anchor.text) * 2
        + funding_keyword_hits(&anchor.url.path().replace(['-', '_', '/'], " "))
}

/// Article anchors on a page, date-filtered, in document order.
pub fn article_links(page_url: &Url, root: &Url, html: &str, range: &DateRange) -> Vec<String> {
    extract_anchors(page_url, html)
        .into_iter()
        .filter(|a| looks_like_article(&a.url, root) && in_range(&a.url, range))
        .map(|a| a.url.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extract_anchors_resolves_and_dedups() {
        let html = r##"
            <a href="/2024/01/10/acme-raises">Acme raises</a>
            <a href="https://example.com/2024/01/10/acme-raises#comments">dup</a>
            <a href="mailto:a@b.c">mail</a>
            <a href="  /news ">  News
            </a>"##;
        let anchors = extract_anchors(&url("https://example.com/"), html);
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].url.as_str(), "https://example.com/2024/01/10/acme-raises");
        assert_eq!(anchors[1].text, "News");
    }

    #[test]
    fn test_article_shape() {
        assert!(has_article_shape(&url("https://example.com/news/acme-raises-5m")));
        assert!(!has_article_shape(&url("https://example.com/acme")));
        assert!(!has_article_shape(&url("https://example.com/media/logo.png")));
        assert!(!has_article_shape(&url("https://example.com/tag/fintech")));
        assert!(!has_article_shape(&url("https://example.com/news/all?page=2")));
    }

    #[test]
    fn test_looks_like_article_requires_same_site() {
        let root = url("https://www.example.com/");
        assert!(looks_like_article(&url("https://example.com/news/acme"), &root));
        assert!(!looks_like_article(&url("https://other.com/news/acme"), &root));
    }

    #[test]
    fn test_date_from_url() {
        assert_eq!(
            date_from_url("https://techcrunch.com/2024/01/10/acme-raises/"),
            NaiveDate::from_ymd_opt(2024, 1, 10)
        );
        assert_eq!(date_from_url("https://example.com/news/acme"), None);
        assert_eq!(date_from_url("https://example.com/2024/13/40/bad"), None);
    }

    #[test]
    fn test_listing_patterns() {
        let patterns = vec!["/news".to_string(), "/funding".to_string()];
        assert!(matches_listing_pattern(&url("https://example.com/news/"), &patterns));
        assert!(matches_listing_pattern(&url("https://example.com/funding/seed"), &patterns));
        assert!(!matches_listing_pattern(&url("https://example.com/funding/2024/01/x"), &patterns));
        assert!(!matches_listing_pattern(&url("https://example.com/newsletter"), &patterns));
    }

    #[test]
    fn test_anchor_score_prefers_funding_text() {
        let funding = Anchor { url: url("https://e.com/a/acme-raises-series-a"), text: "Acme raises Series A".into() };
        let other = Anchor { url: url("https://e.com/a/weather"), text: "Weekend weather".into() };
        assert!(anchor_score(&funding) > anchor_score(&other));
        assert_eq!(anchor_score(&other), 0);
    }
}

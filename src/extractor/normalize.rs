//! Value repair for model output: dates, amounts, rounds, URLs and text.
//!
//! Every function returns `None` for placeholders ("N/A", "unknown", ...)
//! instead of passing them through.

use crate::dedup::normalize_company_name;
use crate::utils::registrable_domain;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

const PLACEHOLDERS: &[&str] = &[
    "", "-", "n/a", "na", "none", "null", "nil", "unknown", "not specified", "not mentioned",
    "not available", "not disclosed", "undisclosed", "tbd", "not provided", "not stated",
];

pub fn is_placeholder(s: &str) -> bool {
    let lower = s.trim().trim_matches(|c| c == '.' || c == '"').to_lowercase();
    PLACEHOLDERS.contains(&lower.as_str())
}

/// Trimmed, whitespace-collapsed text, or `None` for placeholders.
pub fn clean_text(s: &str) -> Option<String> {
    if is_placeholder(s) {
        return None;
    }
    Some(s.split_whitespace().collect::<Vec<_>>().join(" "))
}

static ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").unwrap());

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%b %d %Y", "%d %B %Y",
    "%d %b %Y", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d",
];

/// Parse the date formats seen in feeds, meta tags and model replies.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if is_placeholder(s) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    let cleaned = ORDINAL.replace_all(s, "$1").replace("Sept", "Sep");
    let cleaned = cleaned.trim_end_matches('.');
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(cleaned, fmt) {
            return Some(d);
        }
    }
    // Leading ISO date followed by anything (`2024-01-10T08:00:00.000+0000`).
    s.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        (?P<pre>US\$|C\$|A\$|\$|€|£|¥|₹|usd|eur|gbp|inr|jpy|cad|aud|chf|sgd)?\s*
        (?P<num>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*
        (?P<unit>billion|bn|b|million|mln|mn|mm|m|thousand|k)?\b\s*
        (?P<post>usd|eur|gbp|inr|jpy|cad|aud|chf|sgd|dollars|euros|pounds)?",
    )
    .unwrap()
});

fn currency_code(token: &str) -> Option<&'static str> {
    match token.to_lowercase().as_str() {
        "$" | "us$" | "usd" | "dollars" => Some("USD"),
        "c$" | "cad" => Some("CAD"),
        "a$" | "aud" => Some("AUD"),
        "€" | "eur" | "euros" => Some("EUR"),
        "£" | "gbp" | "pounds" => Some("GBP"),
        "¥" | "jpy" => Some("JPY"),
        "₹" | "inr" => Some("INR"),
        "chf" => Some("CHF"),
        "sgd" => Some("SGD"),
        _ => None,
    }
}

/// `"$6.6 million"` -> `(6_600_000, Some("USD"))`.
pub fn parse_amount(s: &str) -> Option<(u64, Option<String>)> {
    if is_placeholder(s) {
        return None;
    }
    let caps = AMOUNT.captures(s)?;
    let number: f64 = caps["num"].replace(',', "").parse().ok()?;
    let multiplier = match caps.name("unit").map(|m| m.as_str().to_lowercase()).as_deref() {
        Some("billion" | "bn" | "b") => 1e9,
        Some("million" | "mln" | "mn" | "mm" | "m") => 1e6,
        Some("thousand" | "k") => 1e3,
        _ => 1.0,
    };
    let value = (number * multiplier).round();
    if !(value.is_finite() && value > 0.0) {
        return None;
    }
    let currency = caps
        .name("pre")
        .or_else(|| caps.name("post"))
        .and_then(|m| currency_code(m.as_str()))
        .map(str::to_string);
    Some((value as u64, currency))
}

/// ISO 4217 code for a free-form currency value.
pub fn normalize_currency(s: &str) -> Option<String> {
    let trimmed = s.trim();
    currency_code(trimmed).map(str::to_string).or_else(|| {
        (trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()))
            .then(|| trimmed.to_ascii_uppercase())
    })
}

static SERIES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^series\s+([a-k])(\d?)(\+?)$").unwrap());

/// Canonical funding round name: `seed round` -> `Seed`, `series-a` -> `Series A`.
pub fn canonical_round(s: &str) -> Option<String> {
    let text = clean_text(s)?;
    let lower = text.to_lowercase().replace(['-', '_'], " ");
    let stripped = lower
        .split_whitespace()
        .filter(|w| !matches!(*w, "round" | "funding" | "financing" | "investment" | "raise"))
        .collect::<Vec<_>>()
        .join(" ");
    let canonical = match stripped.as_str() {
        "" => return None,
        "pre seed" | "preseed" => "Pre-Seed".to_string(),
        "seed" => "Seed".to_string(),
        "seed extension" | "seed+" => "Seed Extension".to_string(),
        "angel" => "Angel".to_string(),
        "bridge" => "Bridge".to_string(),
        "ipo" => "IPO".to_string(),
        "debt" => "Debt".to_string(),
        "grant" => "Grant".to_string(),
        "growth" | "growth equity" => "Growth".to_string(),
        other => match SERIES.captures(other) {
            Some(caps) => format!("Series {}{}{}", caps[1].to_uppercase(), &caps[2], &caps[3]),
            None => text,
        },
    };
    Some(canonical)
}

/// Repair a website value into an absolute `http(s)` URL.
pub fn normalize_url(s: &str) -> Option<String> {
    let s = s.trim().trim_matches(|c| c == '<' || c == '>' || c == '"');
    if is_placeholder(s) || s.contains(char::is_whitespace) {
        return None;
    }
    let candidate = if s.starts_with("http://") || s.starts_with("https://") {
        s.to_string()
    } else if let Some(rest) = s.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{s}")
    };
    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?;
    if !host.contains('.') {
        return None;
    }
    Some(url.to_string())
}

/// A LinkedIn company or profile URL, or `None`.
pub fn normalize_linkedin(s: &str) -> Option<String> {
    let url = normalize_url(s)?;
    let host = Url::parse(&url).ok()?.host_str()?.to_ascii_lowercase();
    (host == "linkedin.com" || host.ends_with(".linkedin.com")).then_some(url)
}

/// Normalized Levenshtein score above which a domain label or LinkedIn slug
/// is taken to name the company.
const LINK_MATCH_THRESHOLD: f64 = 0.7;

fn squash(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase()
}

/// The part of `url` that should name its owner: the LinkedIn page slug, or
/// the first label of the registrable domain.
fn link_label(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    if host == "linkedin.com" || host.ends_with(".linkedin.com") {
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        segments.next()?;
        return segments.next().map(squash);
    }
    registrable_domain(&host).split('.').next().map(squash)
}

/// Whether `link` plausibly belongs to `company`.
///
/// `acme.io`, `getacme.com` and `linkedin.com/company/acme-inc` all pass for
/// "Acme Inc."; a news site or another company's page does not.
pub fn link_matches_company(company: &str, link: &str) -> bool {
    let key = squash(&normalize_company_name(company));
    let Some(label) = Url::parse(link).ok().as_ref().and_then(link_label) else {
        return false;
    };
    if key.is_empty() || label.is_empty() {
        return false;
    }
    if key.len() >= 3 && label.len() >= 3 && (label.contains(&key) || key.contains(&label)) {
        return true;
    }
    strsim::normalized_levenshtein(&key, &label) > LINK_MATCH_THRESHOLD
}

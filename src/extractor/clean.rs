//! HTML to readable text.
//!
//! Picks the main content container, drops boilerplate subtrees (navigation,
//! ads, scripts, footers) and keeps block structure as line breaks. Also pulls
//! the page title and publication date from metadata.

use super::normalize::parse_date;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};

/// Readable projection of an article page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedPage {
    pub title: Option<String>,
    pub text: String,
    pub published: Option<NaiveDate>,
}

const PRUNED_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe", "svg",
    "button", "template", "select", "figure",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4",
    "h5", "h6", "blockquote", "tr", "table", "pre", "dd", "dt",
];

static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^|[\s_-])(nav|navbar|menu|footer|sidebar|advert|ads?|ad-slot|promo|sponsored|social|share|sharing|cookie|newsletter|subscribe|related|comments?|breadcrumbs?|popup|modal|paywall)([\s_-]|$)",
    )
    .unwrap()
});

static CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["[itemprop=articleBody]", "article", "main, [role=main]", "body"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static DATE_META: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[property="article:published_time"], meta[itemprop="datePublished"],
           meta[name="pubdate"], meta[name="publishdate"], meta[name="date"],
           meta[name="parsely-pub-date"], meta[name="sailthru.date"],
           meta[property="og:published_time"], meta[name="dc.date"]"#,
    )
    .unwrap()
});
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());
static JSON_LD_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""datePublished"\s*:\s*"([^"]+)""#).unwrap());

static OG_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title, h1").unwrap());

fn is_boilerplate(el: &Element) -> bool {
    if PRUNED_TAGS.contains(&el.name()) {
        return true;
    }
    if el.attr("aria-hidden") == Some("true") || el.attr("hidden").is_some() {
        return true;
    }
    el.attr("class").is_some_and(|c| BOILERPLATE.is_match(c))
        || el.id().is_some_and(|id| BOILERPLATE.is_match(id))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let el = child.value();
            if is_boilerplate(el) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&el.name());
            if block {
                out.push('\n');
            }
            collect_text(child, out);
            if block {
                out.push('\n');
            }
        }
    }
}

/// Collapse whitespace inside lines and drop empty lines.
fn tidy(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn main_text(document: &Html) -> String {
    for selector in CONTAINERS.iter() {
        let best = document
            .select(selector)
            .map(|el| {
                let mut raw = String::new();
                collect_text(el, &mut raw);
                tidy(&raw)
            })
            .max_by_key(|text| text.len());
        if let Some(text) = best.filter(|t| !t.is_empty()) {
            return text;
        }
    }
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);
    tidy(&raw)
}

fn published_date(document: &Html, raw_html: &str) -> Option<NaiveDate> {
    document
        .select(&DATE_META)
        .filter_map(|m| m.value().attr("content"))
        .chain(document.select(&TIME).filter_map(|t| t.value().attr("datetime")))
        .find_map(parse_date)
        .or_else(|| {
            JSON_LD_DATE
                .captures_iter(raw_html)
                .find_map(|caps| parse_date(&caps[1]))
        })
}

fn title(document: &Html) -> Option<String> {
    document
        .select(&OG_TITLE)
        .filter_map(|m| m.value().attr("content"))
        .map(str::to_string)
        .chain(document.select(&TITLE).map(|t| t.text().collect::<String>()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

/// Parse `raw_html` and return its readable projection.
pub fn clean_html(raw_html: &str) -> CleanedPage {
    let document = Html::parse_document(raw_html);
    CleanedPage {
        title: title(&document),
        text: main_text(&document),
        published: published_date(&document, raw_html),
    }
}

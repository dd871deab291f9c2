//! Sitemap and feed discovery.
//!
//! Reads `urlset` and `sitemapindex` documents as well as RSS and Atom feeds.
//! Locations are taken from `robots.txt` and the conventional
//! `/sitemap.xml`, `/sitemap_index.xml` and `/sitemap-news.xml` paths, or the
//! root itself when it already points at a feed.

use super::{DiscoveryContext, Strategy};
use crate::error::DiscoveryError;
use crate::extractor::normalize::parse_date;
use crate::models::{CrawlTarget, DateRange, StrategyTier};
use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, instrument, warn};
use url::Url;

const PROBE_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemap-news.xml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    UrlSet,
    Index,
    Feed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSitemap {
    pub kind: DocKind,
    pub entries: Vec<SitemapEntry>,
}

#[derive(Default)]
struct Pending {
    loc: Option<String>,
    date: Option<NaiveDate>,
}

#[derive(Clone, Copy)]
enum Slot {
    Loc,
    Date,
}

fn is_container(name: &[u8]) -> bool {
    matches!(name, b"url" | b"sitemap" | b"item" | b"entry")
}

fn is_date(name: &[u8]) -> bool {
    matches!(
        name,
        b"lastmod" | b"pubDate" | b"updated" | b"published" | b"publication_date" | b"date"
    )
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find(';').and_then(|end| resolve_entity(&tail[..end]).map(|c| (c, end))) {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `href` of an Atom `<link>` pointing at the entry itself.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut rel = None;
    for attr in e.attributes().flatten() {
        let value = unescape(&String::from_utf8_lossy(&attr.value));
        match attr.key.as_ref() {
            b"href" => href = Some(value),
            b"rel" => rel = Some(value),
            _ => {}
        }
    }
    match rel.as_deref() {
        None | Some("alternate") => href,
        _ => None,
    }
}

/// Parse any supported sitemap or feed dialect.
pub fn parse_sitemap(xml: &str) -> Result<ParsedSitemap, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut kind = DocKind::Unknown;
    let mut entries = Vec::new();
    let mut pending: Option<Pending> = None;
    let mut slot: Option<Slot> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = e.local_name();
                let name = local.as_ref();
                if kind == DocKind::Unknown {
                    kind = match name {
                        b"urlset" => DocKind::UrlSet,
                        b"sitemapindex" => DocKind::Index,
                        b"rss" | b"feed" | b"RDF" => DocKind::Feed,
                        _ => DocKind::Unknown,
                    };
                }
                if is_container(name) {
                    pending = Some(Pending::default());
                } else if let Some(p) = pending.as_mut() {
                    if name == b"link" {
                        if let Some(href) = atom_href(&e) {
                            p.loc.get_or_insert(href);
                            continue;
                        }
                    }
                    if name == b"loc" || name == b"link" {
                        slot = Some(Slot::Loc);
                        text.clear();
                    } else if is_date(name) {
                        slot = Some(Slot::Date);
                        text.clear();
                    }
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"link" {
                    if let (Some(p), Some(href)) = (pending.as_mut(), atom_href(&e)) {
                        p.loc.get_or_insert(href);
                    }
                }
            }
            Event::Text(t) if slot.is_some() => text.push_str(&String::from_utf8_lossy(&t)),
            Event::CData(t) if slot.is_some() => text.push_str(&String::from_utf8_lossy(&t)),
            Event::GeneralRef(r) if slot.is_some() => {
                let name = String::from_utf8_lossy(&r);
                match resolve_entity(&name) {
                    Some(c) => text.push(c),
                    None => {
                        text.push('&');
                        text.push_str(&name);
                        text.push(';');
                    }
                }
            }
            Event::End(e) => {
                let local = e.local_name();
                if is_container(local.as_ref()) {
                    if let Some(Pending { loc: Some(loc), date }) = pending.take() {
                        entries.push(SitemapEntry { loc, date });
                    }
                } else if let (Some(s), Some(p)) = (slot.take(), pending.as_mut()) {
                    let value = unescape(text.trim());
                    match s {
                        Slot::Loc if !value.is_empty() => {
                            p.loc.get_or_insert(value);
                        }
                        Slot::Date => {
                            if p.date.is_none() {
                                p.date = parse_date(&value);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(ParsedSitemap { kind, entries })
}

/// `Sitemap:` lines of a robots.txt body.
pub fn robots_sitemaps(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        })
        .filter(|v| !v.is_empty())
        .collect()
}

/// True when the root itself is a feed or sitemap document.
pub fn is_feed_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    [".xml", ".rss", ".atom"].iter().any(|ext| path.ends_with(ext))
        || path.split('/').any(|seg| seg == "rss" || seg == "feed" || seg == "atom")
}

fn is_fetchable(loc: &str) -> bool {
    Url::parse(loc).is_ok_and(|u| u.scheme() == "http" || u.scheme() == "https")
}

// A child sitemap whose lastmod predates the window cannot hold newer entries.
fn child_may_overlap(date: Option<NaiveDate>, range: &DateRange) -> bool {
    match (date, range.start) {
        (Some(d), Some(start)) => d >= start,
        _ => true,
    }
}

#[derive(Debug, Default)]
pub struct SitemapStrategy;

impl SitemapStrategy {
    async fn locations(&self, ctx: &DiscoveryContext, root: &Url) -> Vec<String> {
        if is_feed_url(root) {
            return vec![root.to_string()];
        }
        let mut locations = Vec::new();
        if let Ok(robots) = root.join("/robots.txt") {
            match ctx.get_page(robots.as_str()).await {
                Ok(body) => locations.extend(robots_sitemaps(&body)),
                Err(e) => debug!(error = %e, "robots.txt unavailable"),
            }
        }
        locations.extend(
            PROBE_PATHS
                .iter()
                .filter_map(|p| root.join(p).ok())
                .map(|u| u.to_string()),
        );
        locations
    }
}

#[async_trait]
impl Strategy for SitemapStrategy {
    fn tier(&self) -> StrategyTier {
        StrategyTier::Sitemap
    }

    #[instrument(level = "info", skip_all, fields(root = %target.root_url))]
    async fn discover(
        &self,
        ctx: &DiscoveryContext,
        target: &CrawlTarget,
    ) -> Result<Vec<String>, DiscoveryError> {
        let cap = ctx.settings.max_urls_per_strategy;
        let mut queue: VecDeque<String> = self.locations(ctx, &target.root_url).await.into();
        let mut visited = HashSet::new();
        let mut children_followed = 0usize;
        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        let mut last_error = None;
        let mut any_document = false;

        while let Some(location) = queue.pop_front() {
            if urls.len() >= cap {
                break;
            }
            if !visited.insert(location.clone()) {
                continue;
            }
            let body = match ctx.get_page(&location).await {
                Ok(body) => body,
                Err(e) => {
                    debug!(%location, error = %e, "sitemap location unavailable");
                    last_error = Some(e);
                    continue;
                }
            };
            let parsed = match parse_sitemap(&body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(%location, error = %e, "unparseable sitemap");
                    continue;
                }
            };
            any_document = true;
            debug!(%location, kind = ?parsed.kind, entries = parsed.entries.len(), "parsed sitemap");

            if parsed.kind == DocKind::Index {
                for child in parsed.entries {
                    if children_followed >= ctx.settings.max_child_sitemaps {
                        break;
                    }
                    if child_may_overlap(child.date, &target.date_range) {
                        queue.push_back(child.loc);
                        children_followed += 1;
                    }
                }
                continue;
            }

            for entry in parsed.entries {
                if urls.len() >= cap {
                    break;
                }
                if !is_fetchable(&entry.loc) || !target.date_range.admits(entry.date) {
                    continue;
                }
                if seen.insert(entry.loc.clone()) {
                    urls.push(entry.loc);
                }
            }
        }

        if !any_document {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        info!(count = urls.len(), children_followed, "sitemap discovery finished");
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::context;
    use crate::testing::{MockHttp, xml};
    use std::sync::Arc;

    fn urlset(entries: &[(&str, &str)]) -> String {
        let body: String = entries
            .iter()
            .map(|(loc, date)| format!("<url><loc>{loc}</loc><lastmod>{date}</lastmod></url>"))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{body}</urlset>"#
        )
    }

    #[test]
    fn test_parse_urlset_with_entities() {
        let doc = parse_sitemap(&urlset(&[("https://e.com/a?x=1&amp;y=2", "2024-01-10T08:00:00+00:00")])).unwrap();
        assert_eq!(doc.kind, DocKind::UrlSet);
        assert_eq!(doc.entries[0].loc, "https://e.com/a?x=1&y=2");
        assert_eq!(doc.entries[0].date, NaiveDate::from_ymd_opt(2024, 1, 10));
    }

    #[test]
    fn test_parse_rss_and_atom() {
        let rss = r#"<rss version="2.0"><channel><title>t</title><link>https://e.com</link>
            <item><title>Acme raises</title><link>https://e.com/news/acme</link>
            <pubDate>Wed, 10 Jan 2024 08:00:00 GMT</pubDate></item></channel></rss>"#;
        let doc = parse_sitemap(rss).unwrap();
        assert_eq!(doc.kind, DocKind::Feed);
        assert_eq!(doc.entries, vec![SitemapEntry {
            loc: "https://e.com/news/acme".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 10),
        }]);

        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom"><link href="https://e.com/" rel="self"/>
            <entry><link rel="alternate" href="https://e.com/news/beta"/><updated>2024-02-01T00:00:00Z</updated></entry></feed>"#;
        let doc = parse_sitemap(atom).unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert_eq!(doc.entries[0].loc, "https://e.com/news/beta");
    }

    #[test]
    fn test_parse_news_sitemap_publication_date() {
        let news = r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" xmlns:news="http://www.google.com/schemas/sitemap-news/0.9">
            <url><loc>https://e.com/news/gamma</loc><news:news><news:publication_date>2024-03-05</news:publication_date></news:news></url></urlset>"#;
        let doc = parse_sitemap(news).unwrap();
        assert_eq!(doc.entries[0].date, NaiveDate::from_ymd_opt(2024, 3, 5));
    }

    #[test]
    fn test_robots_sitemap_lines() {
        let robots = "User-agent: *\nDisallow: /admin\nSitemap: https://e.com/news.xml\nsitemap:https://e.com/b.xml\n";
        assert_eq!(robots_sitemaps(robots), vec!["https://e.com/news.xml", "https://e.com/b.xml"]);
    }

    #[test]
    fn test_feed_urls() {
        assert!(is_feed_url(&Url::parse("https://news.google.com/rss/search?q=x").unwrap()));
        assert!(is_feed_url(&Url::parse("https://e.com/feed").unwrap()));
        assert!(!is_feed_url(&Url::parse("https://e.com/news").unwrap()));
    }

    #[tokio::test]
    async fn test_date_filter_keeps_exactly_in_range_entries() {
        let inside: Vec<(String, String)> = (1..=5)
            .map(|d| (format!("https://e.com/news/in-{d}"), format!("2024-01-{:02}", d * 5)))
            .collect();
        let outside = [
            ("https://e.com/news/old-1", "2023-12-01"),
            ("https://e.com/news/old-2", "2023-06-15"),
            ("https://e.com/news/new-1", "2024-03-01"),
        ];
        let mut all: Vec<(&str, &str)> = inside.iter().map(|(u, d)| (u.as_str(), d.as_str())).collect();
        all.extend(outside);
        let http = Arc::new(MockHttp::new().route("https://e.com/sitemap.xml", xml(urlset(&all))));
        let ctx = context(http);
        let target = CrawlTarget::new(
            Url::parse("https://e.com/").unwrap(),
            DateRange::new(NaiveDate::from_ymd_opt(2024, 1, 1), NaiveDate::from_ymd_opt(2024, 1, 31)),
            None,
        );
        let urls = SitemapStrategy.discover(&ctx, &target).await.unwrap();
        assert_eq!(urls.len(), 5);
        assert!(urls.iter().all(|u| u.contains("/in-")));
    }

    #[tokio::test]
    async fn test_index_children_are_followed_within_budget() {
        let index = r#"<sitemapindex><sitemap><loc>https://e.com/s1.xml</loc></sitemap>
            <sitemap><loc>https://e.com/s2.xml</loc></sitemap></sitemapindex>"#;
        let http = Arc::new(
            MockHttp::new()
                .route("https://e.com/robots.txt", Ok(crate::http::HttpResponse {
                    status: 200,
                    headers: Default::default(),
                    body: "Sitemap: https://e.com/index.xml".into(),
                }))
                .route("https://e.com/index.xml", xml(index))
                .route("https://e.com/s1.xml", xml(urlset(&[("https://e.com/news/one", "2024-01-01")])))
                .route("https://e.com/s2.xml", xml(urlset(&[("https://e.com/news/two", "2024-01-02")]))),
        );
        let mut ctx = context(http.clone());
        ctx.settings.max_child_sitemaps = 1;
        let target = CrawlTarget::new(Url::parse("https://e.com/").unwrap(), DateRange::default(), None);
        let urls = SitemapStrategy.discover(&ctx, &target).await.unwrap();
        assert_eq!(urls, vec!["https://e.com/news/one"]);
        assert_eq!(http.calls("https://e.com/s2.xml"), 0);
    }

    #[tokio::test]
    async fn test_all_locations_failing_is_an_error() {
        let http = Arc::new(MockHttp::new());
        let ctx = context(http);
        let target = CrawlTarget::new(Url::parse("https://e.com/").unwrap(), DateRange::default(), None);
        assert!(SitemapStrategy.discover(&ctx, &target).await.is_err());
    }
}

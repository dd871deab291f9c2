//! Category/listing page discovery.
//!
//! Follows root navigation links that match a known listing pattern
//! (`/news`, `/funding`, ...) and collects article anchors from each listing.

use super::links::{article_links, extract_anchors, matches_listing_pattern};
use super::{DiscoveryContext, Strategy};
use crate::error::DiscoveryError;
use crate::models::{CrawlTarget, StrategyTier};
use crate::utils::same_site;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Same-site links on the root page that look like listing pages.
pub fn listing_pages(root: &Url, html: &str, patterns: &[String], limit: usize) -> Vec<Url> {
    let root_host = root.host_str().unwrap_or_default();
    extract_anchors(root, html)
        .into_iter()
        .map(|a| a.url)
        .filter(|u| u.host_str().is_some_and(|h| same_site(h, root_host)))
        .filter(|u| matches_listing_pattern(u, patterns))
        .take(limit)
        .collect()
}

#[derive(Debug, Default)]
pub struct ListingStrategy;

#[async_trait]
impl Strategy for ListingStrategy {
    fn tier(&self) -> StrategyTier {
        StrategyTier::Listing
    }

    #[instrument(level = "info", skip_all, fields(root = %target.root_url))]
    async fn discover(
        &self,
        ctx: &DiscoveryContext,
        target: &CrawlTarget,
    ) -> Result<Vec<String>, DiscoveryError> {
        let root = &target.root_url;
        let home = ctx.get_page(root.as_str()).await?;
        let pages = listing_pages(
            root,
            &home,
            &ctx.settings.listing_patterns,
            ctx.settings.max_listing_pages,
        );
        if pages.is_empty() {
            return Err(DiscoveryError::NoEntryPoints(
                "no listing links on root page".to_string(),
            ));
        }
        debug!(pages = pages.len(), "following listing pages");

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for page in pages {
            if urls.len() >= ctx.settings.max_urls_per_strategy {
                break;
            }
            let body = match ctx.get_page(page.as_str()).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(page = %page, error = %e, "listing page unavailable");
                    continue;
                }
            };
            for url in article_links(&page, root, &body, &target.date_range) {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
        info!(count = urls.len(), "listing discovery finished");
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DateRange;
    use crate::strategy::tests::context;
    use crate::testing::{MockHttp, html};
    use chrono::NaiveDate;
    use std::sync::Arc;

    const HOME: &str = r#"<html><body><nav>
        <a href="/news">News</a><a href="/funding/">Funding</a><a href="/about">About</a>
        <a href="https://other.com/news">Elsewhere</a></nav></body></html>"#;

    #[test]
    fn test_listing_pages_match_patterns_on_same_site() {
        let root = Url::parse("https://e.com/").unwrap();
        let patterns = vec!["/news".to_string(), "/funding".to_string()];
        let pages = listing_pages(&root, HOME, &patterns, 5);
        let pages: Vec<&str> = pages.iter().map(Url::as_str).collect();
        assert_eq!(pages, vec!["https://e.com/news", "https://e.com/funding/"]);
    }

    #[tokio::test]
    async fn test_collects_articles_from_listing_pages() {
        let http = Arc::new(
            MockHttp::new()
                .route("https://e.com/", html(HOME))
                .route(
                    "https://e.com/news",
                    html(r#"<a href="/2024/01/10/acme-raises">Acme</a><a href="/2023/05/01/old-news">Old</a><a href="/tag/ai">AI</a>"#),
                )
                .route(
                    "https://e.com/funding/",
                    html(r#"<a href="/2024/01/10/acme-raises">Acme again</a><a href="/deals/beta-series-a">Beta</a>"#),
                ),
        );
        let ctx = context(http);
        let target = CrawlTarget::new(
            Url::parse("https://e.com/").unwrap(),
            DateRange::new(NaiveDate::from_ymd_opt(2024, 1, 1), None),
            None,
        );
        let urls = ListingStrategy.discover(&ctx, &target).await.unwrap();
        assert_eq!(
            urls,
            vec!["https://e.com/2024/01/10/acme-raises", "https://e.com/deals/beta-series-a"]
        );
    }

    #[tokio::test]
    async fn test_no_listing_links_is_an_error() {
        let http = Arc::new(MockHttp::new().route("https://e.com/", html("<a href=\"/about\">About</a>")));
        let target = CrawlTarget::new(Url::parse("https://e.com/").unwrap(), DateRange::default(), None);
        let err = ListingStrategy.discover(&context(http), &target).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoEntryPoints(_)));
    }
}

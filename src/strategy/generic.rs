//! Generic link discovery: article-looking anchors on the root page alone.

use super::links::article_links;
use super::{DiscoveryContext, Strategy};
use crate::error::DiscoveryError;
use crate::models::{CrawlTarget, StrategyTier};
use async_trait::async_trait;
use tracing::{info, instrument};

#[derive(Debug, Default)]
pub struct GenericStrategy;

#[async_trait]
impl Strategy for GenericStrategy {
    fn tier(&self) -> StrategyTier {
        StrategyTier::Generic
    }

    #[instrument(level = "info", skip_all, fields(root = %target.root_url))]
    async fn discover(
        &self,
        ctx: &DiscoveryContext,
        target: &CrawlTarget,
    ) -> Result<Vec<String>, DiscoveryError> {
        let root = &target.root_url;
        let body = ctx.get_page(root.as_str()).await?;
        let urls = article_links(root, root, &body, &target.date_range);
        info!(count = urls.len(), "generic discovery finished");
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DateRange;
    use crate::strategy::tests::context;
    use crate::testing::{MockHttp, html, status};
    use std::sync::Arc;
    use url::Url;

    #[tokio::test]
    async fn test_root_anchors_in_document_order() {
        let http = Arc::new(MockHttp::new().route(
            "https://e.com/",
            html(r#"<a href="/startups/zeta-raises">Zeta</a><a href="/x">short</a>
                 <a href="/startups/alpha-seed">Alpha</a><a href="https://cdn.e.com/img/a.png">img</a>"#),
        ));
        let target = CrawlTarget::new(Url::parse("https://e.com/").unwrap(), DateRange::default(), None);
        let urls = GenericStrategy.discover(&context(http), &target).await.unwrap();
        assert_eq!(
            urls,
            vec!["https://e.com/startups/zeta-raises", "https://e.com/startups/alpha-seed"]
        );
    }

    #[tokio::test]
    async fn test_root_failure_surfaces() {
        let http = Arc::new(MockHttp::new().route("https://e.com/", status(500, "down")));
        let target = CrawlTarget::new(Url::parse("https://e.com/").unwrap(), DateRange::default(), None);
        let err = GenericStrategy.discover(&context(http.clone()), &target).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Fetch { .. }));
        // 5xx is transient: the shared policy allows one retry in tests.
        assert_eq!(http.calls("https://e.com/"), 2);
    }
}

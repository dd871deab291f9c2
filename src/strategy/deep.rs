//! Deep crawl: bounded breadth-first traversal of the site.
//!
//! Pages are visited level by level up to `max_depth` and `max_pages`.
//! Article candidates are scored by funding keywords in their anchor text and
//! path; the result is sorted by score, document order breaking ties.

use super::links::{anchor_score, extract_anchors, has_article_shape, in_range};
use super::{DiscoveryContext, Strategy};
use crate::error::DiscoveryError;
use crate::models::{CrawlTarget, StrategyTier};
use crate::utils::same_site;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Default)]
pub struct DeepStrategy;

struct Scored {
    url: String,
    score: usize,
    order: usize,
}

#[async_trait]
impl Strategy for DeepStrategy {
    fn tier(&self) -> StrategyTier {
        StrategyTier::Deep
    }

    #[instrument(level = "info", skip_all, fields(root = %target.root_url))]
    async fn discover(
        &self,
        ctx: &DiscoveryContext,
        target: &CrawlTarget,
    ) -> Result<Vec<String>, DiscoveryError> {
        let root = &target.root_url;
        let root_host = root.host_str().unwrap_or_default().to_string();
        let max_depth = ctx.settings.max_depth;
        let max_pages = ctx.settings.max_pages.max(1);

        let mut queue: VecDeque<(Url, usize)> = VecDeque::from([(root.clone(), 0)]);
        let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
        let mut found: HashMap<String, Scored> = HashMap::new();
        let mut pages = 0usize;

        while let Some((page, depth)) = queue.pop_front() {
            if pages >= max_pages {
                break;
            }
            pages += 1;
            let body = match ctx.get_page(page.as_str()).await {
                Ok(body) => body,
                // The root must be reachable; deeper pages may fail.
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    debug!(page = %page, error = %e, "skipping page");
                    continue;
                }
            };

            for anchor in extract_anchors(&page, &body) {
                if !anchor.url.host_str().is_some_and(|h| same_site(h, &root_host)) {
                    continue;
                }
                let key = anchor.url.to_string();
                if has_article_shape(&anchor.url) && in_range(&anchor.url, &target.date_range) {
                    let score = anchor_score(&anchor);
                    let order = found.len();
                    found
                        .entry(key.clone())
                        .and_modify(|s| s.score = s.score.max(score))
                        .or_insert(Scored { url: key.clone(), score, order });
                }
                if depth < max_depth && visited.insert(key) {
                    queue.push_back((anchor.url, depth + 1));
                }
            }
        }

        let mut scored: Vec<Scored> = found.into_values().collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score).then(a.order.cmp(&b.order)));
        info!(pages, count = scored.len(), "deep discovery finished");
        Ok(scored.into_iter().map(|s| s.url).collect())
    }
}

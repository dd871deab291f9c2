//! Candidate URL discovery through an ordered chain of strategy tiers.
//!
//! Each tier implements [`Strategy`] with the same `(target) -> urls`
//! contract, so tiers can be reordered or merged without touching the
//! selector:
//!
//! - [`sitemap`]: sitemaps, sitemap indexes, RSS and Atom feeds
//! - [`listing`]: category/listing pages linked from the root
//! - [`generic`]: article-looking anchors on the root page
//! - [`deep`]: bounded breadth-first crawl scored by anchor keywords

pub mod deep;
pub mod generic;
pub mod links;
pub mod listing;
pub mod sitemap;

use crate::config::StrategySettings;
use crate::detector::{BotDetector, Verdict};
use crate::error::{DiscoveryError, FetchFailure, SelectError, TierAttempt};
use crate::http::HttpClient;
use crate::models::{CandidateUrl, CrawlTarget, StrategyTier};
use crate::ratelimit::HostLimiter;
use crate::retry::RetryPolicy;
use crate::utils::host_of;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Shared collaborators for every tier.
#[derive(Clone)]
pub struct DiscoveryContext {
    pub http: Arc<dyn HttpClient>,
    pub detector: BotDetector,
    pub limiter: HostLimiter,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub settings: StrategySettings,
}

impl DiscoveryContext {
    /// Fetch a discovery resource (sitemap, robots.txt, listing page).
    ///
    /// Transient failures are retried under the shared policy; blocked
    /// responses and non-2xx statuses are returned as errors.
    pub async fn get_page(&self, url: &str) -> Result<String, DiscoveryError> {
        let host = host_of(url).unwrap_or_default();
        let host = &host;
        let (result, _) = self
            .retry
            .run(
                "discovery_get",
                move |_| async move {
                    self.limiter.acquire(host).await;
                    let response = self
                        .http
                        .get(url, &self.headers, self.timeout)
                        .await
                        .map_err(FetchFailure::from)?;
                    if !response.is_success() && !matches!(response.status, 403 | 429) {
                        return Err(FetchFailure::Status(response.status));
                    }
                    Ok(response)
                },
                FetchFailure::is_transient,
            )
            .await;
        let response = result.map_err(|source| DiscoveryError::Fetch {
            url: url.to_string(),
            source,
        })?;

        match self
            .detector
            .classify_resource(response.status, &response.headers, &response.body)
        {
            Verdict::Blocked(reason) => Err(DiscoveryError::Blocked {
                url: url.to_string(),
                reason,
            }),
            Verdict::Servable => Ok(response.body),
        }
    }
}

/// One fallback tier. Returns article URLs in document order.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn tier(&self) -> StrategyTier;

    async fn discover(
        &self,
        ctx: &DiscoveryContext,
        target: &CrawlTarget,
    ) -> Result<Vec<String>, DiscoveryError>;
}

/// Result of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub candidates: Vec<CandidateUrl>,
    /// Label of the tier(s) that produced candidates, e.g. `sitemap` or `listing+generic`.
    pub strategy: String,
    pub attempts: Vec<TierAttempt>,
}

pub struct StrategySelector {
    ctx: DiscoveryContext,
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategySelector {
    pub fn new(ctx: DiscoveryContext) -> Self {
        Self::with_strategies(
            ctx,
            vec![
                Box::new(sitemap::SitemapStrategy),
                Box::new(listing::ListingStrategy),
                Box::new(generic::GenericStrategy),
                Box::new(deep::DeepStrategy),
            ],
        )
    }

    pub fn with_strategies(ctx: DiscoveryContext, strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { ctx, strategies }
    }

    /// Tiers to try for `target`: configured order, hint first, deep only
    /// when enabled.
    pub fn plan(&self, target: &CrawlTarget) -> Vec<StrategyTier> {
        let mut order: Vec<StrategyTier> = Vec::new();
        if let Some(hint) = target.strategy_hint {
            order.push(hint);
        }
        for tier in &self.ctx.settings.order {
            if !order.contains(tier) {
                order.push(*tier);
            }
        }
        order.retain(|t| *t != StrategyTier::Deep || self.ctx.settings.deep_crawl);
        order
    }

    fn strategy_for(&self, tier: StrategyTier) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|s| s.tier() == tier)
            .map(|s| s.as_ref())
    }

    /// Walk the tier chain and return ranked candidates.
    ///
    /// Stops at the first tier with at least one candidate unless
    /// `merge_strategies` is set. Each tier contributes at most
    /// `max_urls_per_strategy` URLs; a URL already produced by an earlier
    /// tier keeps its earlier rank.
    #[instrument(level = "info", skip_all, fields(root = %target.root_url))]
    pub async fn select(&self, target: &CrawlTarget) -> Result<Selection, SelectError> {
        let cap = self.ctx.settings.max_urls_per_strategy;
        let mut candidates: Vec<CandidateUrl> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut attempts = Vec::new();
        let mut producing = Vec::new();

        for tier in self.plan(target) {
            let Some(strategy) = self.strategy_for(tier) else {
                warn!(%tier, "no strategy registered for tier");
                continue;
            };
            let (found, failure) = match strategy.discover(&self.ctx, target).await {
                Ok(urls) => {
                    let mut added = 0;
                    for url in urls {
                        if added == cap {
                            break;
                        }
                        if seen.insert(url.clone()) {
                            candidates.push(CandidateUrl {
                                url,
                                discovered_via: tier,
                                discovery_rank: candidates.len(),
                            });
                            added += 1;
                        }
                    }
                    let failure = (added == 0).then(|| "no article URLs".to_string());
                    (added, failure)
                }
                Err(e) => {
                    warn!(%tier, error = %e, "strategy tier failed");
                    (0, Some(e.to_string()))
                }
            };
            info!(%tier, found, confidence = tier.confidence(), "strategy tier finished");
            attempts.push(TierAttempt {
                tier,
                found,
                confidence: tier.confidence(),
                failure,
            });
            if found > 0 {
                producing.push(tier.label());
                if !self.ctx.settings.merge_strategies {
                    break;
                }
            }
        }

        if candidates.is_empty() {
            return Err(SelectError::NoCandidatesFound {
                root_url: target.root_url.to_string(),
                attempts,
            });
        }
        Ok(Selection {
            candidates,
            strategy: producing.join("+"),
            attempts,
        })
    }
}

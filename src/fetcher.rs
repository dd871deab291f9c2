//! Concurrent candidate fetching.
//!
//! Every attempt waits for the host's rate-limit permit, issues one GET and
//! runs the bot detector over the response. Transient failures (timeouts,
//! connection errors, 5xx, 408) back off and retry; blocked responses never
//! do. Results stream out in completion order, exactly one per candidate.

use crate::config::{BlockedHostPolicy, FetchSettings};
use crate::detector::{BlockReason, BotDetector, Verdict};
use crate::error::FetchFailure;
use crate::http::HttpClient;
use crate::models::{CandidateUrl, FetchResult, FetchStatus};
use crate::ratelimit::HostLimiter;
use crate::retry::RetryPolicy;
use crate::utils::host_of;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
enum AttemptError {
    #[error("blocked: {0}")]
    Blocked(BlockReason),

    #[error(transparent)]
    Failed(FetchFailure),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Failed(f) if f.is_transient())
    }
}

pub struct Fetcher {
    http: Arc<dyn HttpClient>,
    detector: BotDetector,
    limiter: HostLimiter,
    retry: RetryPolicy,
    timeout: Duration,
    headers: Vec<(String, String)>,
    policy: BlockedHostPolicy,
    blocked_hosts: Mutex<HashSet<String>>,
}

impl Fetcher {
    pub fn new(http: Arc<dyn HttpClient>, settings: &FetchSettings, limiter: HostLimiter) -> Self {
        Self {
            http,
            detector: BotDetector::new(settings.min_article_bytes),
            limiter,
            retry: settings.retry_policy(),
            timeout: settings.timeout(),
            headers: vec![(
                "Accept".to_string(),
                "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8".to_string(),
            )],
            policy: settings.blocked_host_policy,
            blocked_hosts: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch `candidates` with at most `concurrency_limit` requests in flight
    /// and one request start per host per `per_host_interval`.
    ///
    /// Standalone form with its own host limiter. The pipeline drives
    /// [`Fetcher::fetch_one`] itself so it can hand each body straight to
    /// extraction.
    #[cfg(test)]
    pub fn fetch_all(
        &self,
        candidates: Vec<CandidateUrl>,
        concurrency_limit: usize,
        per_host_interval: Duration,
    ) -> impl futures::Stream<Item = FetchResult> + '_ {
        use futures::stream::{self, StreamExt};
        let limiter = HostLimiter::new(per_host_interval);
        stream::iter(candidates)
            .map(move |candidate| {
                let limiter = limiter.clone();
                async move { self.fetch_with(candidate, &limiter).await }
            })
            .buffer_unordered(concurrency_limit.max(1))
    }

    /// Fetch a single candidate under the limiter shared with discovery.
    pub async fn fetch_one(&self, candidate: CandidateUrl) -> FetchResult {
        self.fetch_with(candidate, &self.limiter).await
    }

    fn host_key(host: &str) -> String {
        host.trim_start_matches("www.").to_string()
    }

    fn host_is_blocked(&self, key: &str) -> bool {
        self.policy == BlockedHostPolicy::PerHost
            && self
                .blocked_hosts
                .lock()
                .is_ok_and(|hosts| hosts.contains(key))
    }

    fn mark_blocked(&self, key: String) {
        if self.policy == BlockedHostPolicy::PerHost {
            if let Ok(mut hosts) = self.blocked_hosts.lock() {
                hosts.insert(key);
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(url = %candidate.url))]
    async fn fetch_with(&self, candidate: CandidateUrl, limiter: &HostLimiter) -> FetchResult {
        let Some(host) = host_of(&candidate.url) else {
            warn!("candidate URL has no host");
            return FetchResult {
                candidate,
                status: FetchStatus::Failed,
                raw_content: None,
                attempt_count: 0,
                last_error: Some("invalid URL".to_string()),
            };
        };
        let key = Self::host_key(&host);
        if self.host_is_blocked(&key) {
            debug!(%host, "host already blocked in this run");
            return FetchResult {
                candidate,
                status: FetchStatus::Blocked,
                raw_content: None,
                attempt_count: 0,
                last_error: Some(format!("host {host} blocked earlier in this run")),
            };
        }

        let url = candidate.url.as_str();
        let host = host.as_str();
        let (result, attempts) = self
            .retry
            .run(
                "fetch",
                move |_| async move {
                    limiter.acquire(host).await;
                    let response = self
                        .http
                        .get(url, &self.headers, self.timeout)
                        .await
                        .map_err(|e| AttemptError::Failed(e.into()))?;
                    match self
                        .detector
                        .classify(response.status, &response.headers, &response.body)
                    {
                        Verdict::Blocked(reason) => Err(AttemptError::Blocked(reason)),
                        Verdict::Servable if response.is_success() => Ok(response.body),
                        Verdict::Servable => Err(AttemptError::Failed(FetchFailure::Status(response.status))),
                    }
                },
                AttemptError::is_retryable,
            )
            .await;

        match result {
            Ok(body) => {
                debug!(attempts, bytes = body.len(), "fetched");
                FetchResult {
                    candidate,
                    status: FetchStatus::Ok,
                    raw_content: Some(body),
                    attempt_count: attempts,
                    last_error: None,
                }
            }
            Err(AttemptError::Blocked(reason)) => {
                warn!(%reason, "blocked by anti-bot protection");
                self.mark_blocked(key);
                FetchResult {
                    candidate,
                    status: FetchStatus::Blocked,
                    raw_content: None,
                    attempt_count: attempts,
                    last_error: Some(reason.to_string()),
                }
            }
            Err(AttemptError::Failed(failure)) => {
                warn!(attempts, error = %failure, "fetch failed");
                FetchResult {
                    candidate,
                    status: FetchStatus::Failed,
                    raw_content: None,
                    attempt_count: attempts,
                    last_error: Some(failure.to_string()),
                }
            }
        }
    }
}

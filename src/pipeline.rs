//! End-to-end run for one crawl target.
//!
//! ```text
//! CrawlTarget -> StrategySelector -> Fetcher -> ContentExtractor -> Deduplicator -> RecordStore
//! ```
//!
//! Every candidate runs as one future: it takes a fetch slot, fetches,
//! releases the slot, then takes an extraction slot for extraction and dedup.
//! All futures sit in a single `buffer_unordered`, so an in-flight fetch is
//! polled as soon as it is woken even while every extraction slot is busy.
//! Each attempted URL yields exactly one [`Outcome`], folded into the
//! [`RunReport`]. Per-URL failures never abort the run.

use crate::config::Settings;
use crate::dedup::Deduplicator;
use crate::detector::BotDetector;
use crate::error::{SelectError, TierAttempt};
use crate::extractor::ContentExtractor;
use crate::fetcher::Fetcher;
use crate::http::HttpClient;
use crate::llm::LanguageModel;
use crate::models::{
    CandidateUrl, CrawlTarget, DateRange, DedupDecision, FetchResult, FetchStatus, FieldTemplate, RecordId,
    StoredRecord,
};
use crate::ratelimit::HostLimiter;
use crate::strategy::{DiscoveryContext, StrategySelector};
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What happened to one candidate URL.
#[derive(Debug)]
enum Outcome {
    Accepted(StoredRecord),
    Merged(StoredRecord),
    Duplicate { url: String, of: RecordId },
    OutOfRange { url: String },
    Blocked { url: String, attempts: u32, reason: String },
    FetchFailed { url: String, attempts: u32, error: String },
    ExtractionFailed { url: String, reason: &'static str, detail: String },
    StoreFailed { url: String, error: String },
}

/// Counts per outcome category.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub attempted: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub fetch_failed: usize,
    pub extracted: usize,
    pub extraction_failed: usize,
    pub out_of_range: usize,
    pub accepted: usize,
    pub merged: usize,
    pub duplicates: usize,
    pub store_failed: usize,
}

/// A per-URL failure kept for later strategy tuning.
#[derive(Debug, Clone, Serialize)]
pub struct UrlFailure {
    pub url: String,
    pub stage: &'static str,
    pub reason: String,
    pub attempts: u32,
}

/// Result of one target's run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub root_url: String,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub summary: RunSummary,
    pub accepted: Vec<StoredRecord>,
    pub merged: Vec<StoredRecord>,
    pub failures: Vec<UrlFailure>,
    pub attempts: Vec<TierAttempt>,
}

impl RunReport {
    fn new(target: &CrawlTarget, strategy: String, attempts: Vec<TierAttempt>, candidates: usize) -> Self {
        Self {
            root_url: target.root_url.to_string(),
            strategy,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled: false,
            summary: RunSummary {
                candidates,
                ..RunSummary::default()
            },
            accepted: Vec::new(),
            merged: Vec::new(),
            failures: Vec::new(),
            attempts,
        }
    }

    fn fail(&mut self, url: String, stage: &'static str, reason: String, attempts: u32) {
        self.failures.push(UrlFailure {
            url,
            stage,
            reason,
            attempts,
        });
    }

    fn record(&mut self, outcome: Outcome) {
        let s = &mut self.summary;
        s.attempted += 1;
        match outcome {
            Outcome::Accepted(stored) => {
                s.extracted += 1;
                s.accepted += 1;
                self.accepted.push(stored);
            }
            Outcome::Merged(stored) => {
                s.extracted += 1;
                s.merged += 1;
                self.merged.push(stored);
            }
            Outcome::Duplicate { url, of } => {
                s.extracted += 1;
                s.duplicates += 1;
                debug!(%url, %of, "duplicate");
            }
            Outcome::OutOfRange { url } => {
                s.extracted += 1;
                s.out_of_range += 1;
                debug!(%url, "record outside date range");
            }
            Outcome::Blocked { url, attempts, reason } => {
                s.blocked += 1;
                self.fail(url, "blocked", reason, attempts);
            }
            Outcome::FetchFailed { url, attempts, error } => {
                s.fetch_failed += 1;
                self.fail(url, "fetch", error, attempts);
            }
            Outcome::ExtractionFailed { url, reason, detail } => {
                s.extraction_failed += 1;
                self.fail(url, "extraction", format!("{reason}: {detail}"), 1);
            }
            Outcome::StoreFailed { url, error } => {
                s.extracted += 1;
                s.store_failed += 1;
                self.fail(url, "store", error, 1);
            }
        }
    }
}

/// Composes discovery, fetch, extraction and dedup for crawl targets.
pub struct Pipeline<M> {
    selector: StrategySelector,
    fetcher: Fetcher,
    extractor: ContentExtractor<M>,
    dedup: Deduplicator,
    template: FieldTemplate,
    fetch_concurrency: usize,
    extraction_concurrency: usize,
}

impl<M: LanguageModel> Pipeline<M> {
    /// Wire a pipeline from `settings`.
    ///
    /// Discovery and fetching share one per-host limiter, so sitemap and
    /// listing requests count against the same politeness budget as articles.
    pub fn new(settings: &Settings, http: Arc<dyn HttpClient>, model: M, dedup: Deduplicator) -> Self {
        let limiter = HostLimiter::new(settings.fetch.per_host_interval());
        let ctx = DiscoveryContext {
            http: http.clone(),
            detector: BotDetector::new(settings.fetch.min_article_bytes),
            limiter: limiter.clone(),
            retry: settings.fetch.retry_policy(),
            timeout: settings.fetch.timeout(),
            headers: vec![(
                "Accept".to_string(),
                "application/xml,text/xml,text/html;q=0.9,*/*;q=0.8".to_string(),
            )],
            settings: settings.strategy.clone(),
        };
        let extractor = ContentExtractor::new(model, settings.extraction.clone(), settings.sources.clone());
        Self {
            selector: StrategySelector::new(ctx),
            fetcher: Fetcher::new(http, &settings.fetch, limiter),
            template: extractor.template(),
            extractor,
            dedup,
            fetch_concurrency: settings.fetch.concurrency,
            extraction_concurrency: settings.extraction.concurrency,
        }
    }

    #[cfg(test)]
    pub fn extractor(&self) -> &ContentExtractor<M> {
        &self.extractor
    }

    /// Run discovery, fetch, extraction and dedup for `target`.
    ///
    /// Only strategy exhaustion is an error; everything else is reported per
    /// URL. Once `cancel` fires no further candidates are fetched, and work
    /// already in flight finishes.
    #[instrument(level = "info", skip_all, fields(root = %target.root_url))]
    pub async fn run(&self, target: &CrawlTarget, cancel: &CancellationToken) -> Result<RunReport, SelectError> {
        let t0 = Instant::now();
        let selection = self.selector.select(target).await?;
        let mut report = RunReport::new(
            target,
            selection.strategy.clone(),
            selection.attempts,
            selection.candidates.len(),
        );
        info!(
            candidates = selection.candidates.len(),
            strategy = %selection.strategy,
            "selected candidates"
        );

        let (fetch, extraction) = (self.fetch_concurrency.max(1), self.extraction_concurrency.max(1));
        let fetch_slots = Semaphore::new(fetch);
        let extraction_slots = Semaphore::new(extraction);
        let outcomes = stream::iter(selection.candidates)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|candidate| self.handle(candidate, &target.date_range, cancel, &fetch_slots, &extraction_slots))
            .buffer_unordered(fetch + extraction);
        futures::pin_mut!(outcomes);
        while let Some(outcome) = outcomes.next().await {
            if let Some(outcome) = outcome {
                report.record(outcome);
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.summary.skipped = report.summary.candidates - report.summary.attempted;
        report.finished_at = Utc::now();
        let s = &report.summary;
        info!(
            candidates = s.candidates,
            accepted = s.accepted,
            merged = s.merged,
            duplicates = s.duplicates,
            blocked = s.blocked,
            fetch_failed = s.fetch_failed,
            extraction_failed = s.extraction_failed,
            skipped = s.skipped,
            cancelled = report.cancelled,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    /// Fetch then process one candidate. `None` when cancellation arrived
    /// before a fetch slot did.
    async fn handle(
        &self,
        candidate: CandidateUrl,
        range: &DateRange,
        cancel: &CancellationToken,
        fetch_slots: &Semaphore,
        extraction_slots: &Semaphore,
    ) -> Option<Outcome> {
        let fetched = {
            let _slot = fetch_slots.acquire().await.ok();
            if cancel.is_cancelled() {
                debug!(url = %candidate.url, "cancelled before fetch");
                return None;
            }
            self.fetcher.fetch_one(candidate).await
        };
        Some(self.process(fetched, range, extraction_slots).await)
    }

    async fn process(&self, fetched: FetchResult, range: &DateRange, extraction_slots: &Semaphore) -> Outcome {
        let FetchResult {
            candidate,
            status,
            raw_content,
            attempt_count,
            last_error,
        } = fetched;
        let url = candidate.url;
        let raw = match (status, raw_content) {
            (FetchStatus::Ok, Some(raw)) => raw,
            (FetchStatus::Blocked, _) => {
                return Outcome::Blocked {
                    url,
                    attempts: attempt_count,
                    reason: last_error.unwrap_or_else(|| "blocked".to_string()),
                };
            }
            (_, _) => {
                return Outcome::FetchFailed {
                    url,
                    attempts: attempt_count,
                    error: last_error.unwrap_or_else(|| "empty body".to_string()),
                };
            }
        };

        let _slot = extraction_slots.acquire().await.ok();
        let record = match self.extractor.extract(&url, &raw, &self.template).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%url, reason = e.reason(), error = %e, "extraction failed");
                return Outcome::ExtractionFailed {
                    url,
                    reason: e.reason(),
                    detail: e.to_string(),
                };
            }
        };
        if !range.admits(record.raised_date) {
            return Outcome::OutOfRange { url };
        }

        match self.dedup.admit(record).await {
            Ok(admission) => match (admission.decision, admission.stored) {
                (DedupDecision::Unique, Some(stored)) => Outcome::Accepted(stored),
                (DedupDecision::MergeWith(_), Some(stored)) => Outcome::Merged(stored),
                (DedupDecision::DuplicateOf(of), _) => Outcome::Duplicate { url, of },
                (decision, None) => Outcome::StoreFailed {
                    url,
                    error: format!("{decision:?} without a stored record"),
                },
            },
            Err(e) => {
                warn!(%url, error = %e, "record store failed");
                Outcome::StoreFailed {
                    url,
                    error: e.to_string(),
                }
            }
        }
    }
}

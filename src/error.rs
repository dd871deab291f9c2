//! Typed outcomes for every stage of the pipeline.
//!
//! Only [`SelectError`] aborts a target. Everything else is attached to the
//! candidate URL it happened to and counted in the run statistics.

use crate::detector::BlockReason;
use crate::models::StrategyTier;
use std::path::PathBuf;
use thiserror::Error;

/// One tier's contribution to a selection, kept for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TierAttempt {
    pub tier: StrategyTier,
    pub found: usize,
    pub confidence: f32,
    pub failure: Option<String>,
}

/// Strategy exhaustion. Surfaced to the caller and never retried.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no candidate URLs found for {root_url} after {} tier(s)", .attempts.len())]
    NoCandidatesFound {
        root_url: String,
        attempts: Vec<TierAttempt>,
    },

    #[error("invalid root URL {url}: {source}")]
    InvalidRoot {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Errors surfaced by the HTTP collaborator.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("connection to {url} failed: {detail}")]
    Connect { url: String, detail: String },

    #[error("reading body of {url} failed: {detail}")]
    Body { url: String, detail: String },

    #[error("invalid request URL {url}")]
    InvalidUrl { url: String },

    #[error("request to {url} failed: {detail}")]
    Other { url: String, detail: String },
}

impl HttpError {
    /// Timeouts, resets and truncated bodies are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HttpError::Timeout { .. } | HttpError::Connect { .. } | HttpError::Body { .. }
        )
    }
}

/// Why a single fetch attempt did not produce a servable page.
#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("server answered HTTP {0}")]
    Status(u16),
}

impl FetchFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::Http(e) => e.is_transient(),
            FetchFailure::Status(code) => *code >= 500 || *code == 408,
        }
    }
}

/// Why one strategy tier produced nothing.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchFailure,
    },

    #[error("{url} is blocked: {reason}")]
    Blocked { url: String, reason: BlockReason },

    #[error("no entry points: {0}")]
    NoEntryPoints(String),
}

/// Errors from the language-model collaborator.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("model endpoint rate limited the request: {0}")]
    RateLimited(String),

    #[error("model call timed out")]
    Timeout,

    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("model call failed: {0}")]
    Api(String),
}

impl LlmError {
    /// Buckets a free-form client error message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            LlmError::RateLimited(message.to_string())
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else if ["500", "502", "503", "504", "connection", "overloaded"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            LlmError::Unavailable(message.to_string())
        } else {
            LlmError::Api(message.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::Api(_))
    }
}

/// Per-URL extraction outcome that produced no record. Not retried.
#[derive(Debug, Clone, Error)]
pub enum ExtractionFailure {
    #[error("insufficient content: {0}")]
    InsufficientContent(String),

    #[error("page does not mention a funding event")]
    NotFundingRelated,

    #[error("model returned non-conforming JSON: {preview}")]
    MalformedResponse { preview: String },

    #[error(transparent)]
    Model(#[from] LlmError),
}

impl ExtractionFailure {
    /// Short label used in reports and statistics.
    pub fn reason(&self) -> &'static str {
        match self {
            ExtractionFailure::InsufficientContent(_) => "insufficient_content",
            ExtractionFailure::NotFundingRelated => "not_funding_related",
            ExtractionFailure::MalformedResponse { .. } => "malformed_response",
            ExtractionFailure::Model(_) => "model_error",
        }
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown record id {0}")]
    UnknownRecord(u64),
}

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing settings file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{stage} concurrency must be greater than 0")]
    ZeroConcurrency { stage: &'static str },

    #[error("dedup threshold must be between 0 and 100, got {0}")]
    InvalidThreshold(u8),

    #[error("strategy order must name at least one tier")]
    EmptyStrategyOrder,

    #[error("extraction requests_per_minute must be greater than 0")]
    ZeroModelQuota,

    #[error("max_urls_per_strategy must be greater than 0")]
    ZeroUrlCap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_classification() {
        assert!(matches!(LlmError::classify("HTTP 429 Too Many Requests"), LlmError::RateLimited(_)));
        assert!(matches!(LlmError::classify("operation timed out"), LlmError::Timeout));
        assert!(matches!(LlmError::classify("502 Bad Gateway"), LlmError::Unavailable(_)));
        assert!(matches!(LlmError::classify("invalid api key"), LlmError::Api(_)));
        assert!(!LlmError::Api("bad key".into()).is_retryable());
        assert!(LlmError::Timeout.is_retryable());
    }

    #[test]
    fn test_fetch_failure_transience() {
        assert!(FetchFailure::Status(503).is_transient());
        assert!(FetchFailure::Status(408).is_transient());
        assert!(!FetchFailure::Status(404).is_transient());
        assert!(FetchFailure::Http(HttpError::Timeout { url: "u".into() }).is_transient());
        assert!(!FetchFailure::Http(HttpError::InvalidUrl { url: "u".into() }).is_transient());
    }

    #[test]
    fn test_no_candidates_message_counts_tiers() {
        let err = SelectError::NoCandidatesFound {
            root_url: "https://example.com".into(),
            attempts: vec![
                TierAttempt { tier: StrategyTier::Sitemap, found: 0, confidence: 0.9, failure: Some("404".into()) },
                TierAttempt { tier: StrategyTier::Generic, found: 0, confidence: 0.5, failure: None },
            ],
        };
        assert_eq!(
            err.to_string(),
            "no candidate URLs found for https://example.com after 2 tier(s)"
        );
    }
}

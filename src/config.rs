//! Run settings loaded from a YAML file.
//!
//! Every section carries `#[serde(default)]`, so an empty file (or no file at
//! all) yields a runnable configuration. CLI flags are applied on top in
//! `main`.

use crate::error::ConfigError;
use crate::models::{FundingField, StrategyTier};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub strategy: StrategySettings,
    pub fetch: FetchSettings,
    pub extraction: ExtractionSettings,
    pub dedup: DedupSettings,
    /// Known news sources. Used both as default crawl roots and to name records.
    pub sources: Vec<SourceEntry>,
    pub store_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: StrategySettings::default(),
            fetch: FetchSettings::default(),
            extraction: ExtractionSettings::default(),
            dedup: DedupSettings::default(),
            sources: Vec::new(),
            store_path: PathBuf::from("funding_records.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub order: Vec<StrategyTier>,
    pub max_urls_per_strategy: usize,
    pub merge_strategies: bool,
    pub deep_crawl: bool,
    pub max_depth: usize,
    pub max_pages: usize,
    pub listing_patterns: Vec<String>,
    pub max_listing_pages: usize,
    pub max_child_sitemaps: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            order: StrategyTier::ALL.to_vec(),
            max_urls_per_strategy: 200,
            merge_strategies: false,
            deep_crawl: false,
            max_depth: 2,
            max_pages: 30,
            listing_patterns: [
                "/news", "/funding", "/startups", "/venture", "/fundraising", "/deals",
                "/investments", "/latest", "/articles", "/blog",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_listing_pages: 5,
            max_child_sitemaps: 10,
        }
    }
}

/// Whether one blocked response poisons the rest of the host for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedHostPolicy {
    #[default]
    PerHost,
    PerUrl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub per_host_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub user_agent: String,
    pub blocked_host_policy: BlockedHostPolicy,
    /// 2xx HTML bodies shorter than this are treated as interstitials.
    pub min_article_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            per_host_interval_ms: 1000,
            timeout_secs: 20,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_ms: 250,
            user_agent: format!(
                "Mozilla/5.0 (compatible; awful_funding_news/{})",
                env!("CARGO_PKG_VERSION")
            ),
            blocked_host_policy: BlockedHostPolicy::PerHost,
            min_article_bytes: 512,
        }
    }
}

impl FetchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn per_host_interval(&self) -> Duration {
        Duration::from_millis(self.per_host_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub concurrency: usize,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_content_chars: usize,
    pub min_content_chars: usize,
    pub require_funding_keywords: bool,
    /// Name of the awful_aj chat template used for extraction.
    pub template_name: String,
    pub fields: Vec<FundingField>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            requests_per_minute: 60,
            timeout_secs: 120,
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
            max_content_chars: 12_000,
            min_content_chars: 200,
            require_funding_keywords: true,
            template_name: "funding_extractor".to_string(),
            fields: vec![
                FundingField::RaisedDate,
                FundingField::CompanyName,
                FundingField::AmountRaised,
                FundingField::FundingRound,
                FundingField::Industry,
                FundingField::Website,
                FundingField::Linkedin,
            ],
        }
    }
}

impl ExtractionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// Minimum similarity (0..=100) for two company names to match.
    pub threshold: u8,
    pub date_window_days: i64,
    /// How far back the corpus is loaded from the store at startup.
    pub load_window_days: i64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            threshold: 90,
            date_window_days: 30,
            load_window_days: 365,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    /// Extra hostnames that belong to this source.
    pub domains: Vec<String>,
}

impl Settings {
    /// Read and validate settings from `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&raw)?;
        debug!(sources = settings.sources.len(), "Loaded settings");
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency { stage: "fetch" });
        }
        if self.extraction.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency { stage: "extraction" });
        }
        if self.dedup.threshold > 100 {
            return Err(ConfigError::InvalidThreshold(self.dedup.threshold));
        }
        if self.strategy.order.is_empty() {
            return Err(ConfigError::EmptyStrategyOrder);
        }
        if self.strategy.max_urls_per_strategy == 0 {
            return Err(ConfigError::ZeroUrlCap);
        }
        if self.extraction.requests_per_minute == 0 {
            return Err(ConfigError::ZeroModelQuota);
        }
        Ok(())
    }
}

/// Display name of the entry in `sources` owning `host`, ignoring `www.`.
pub fn source_name<'a>(sources: &'a [SourceEntry], host: &str) -> Option<&'a str> {
    let host = host.trim_start_matches("www.");
    sources
        .iter()
        .find(|s| {
            crate::utils::host_of(&s.url).is_some_and(|h| h.trim_start_matches("www.") == host)
                || s.domains.iter().any(|d| d.trim_start_matches("www.") == host)
        })
        .map(|s| s.name.as_str())
}

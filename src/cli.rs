//! Command-line interface definitions for Awful Funding News.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Flags override the YAML settings file; most can also come from environment
//! variables.

use crate::config::Settings;
use crate::error::SelectError;
use crate::models::{CrawlTarget, DateRange, StrategyTier};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// Command-line arguments for the Awful Funding News application.
///
/// Targets come from `--url` (repeatable) and `--prompt`; with neither, every
/// entry of the settings file's `sources` list is crawled.
///
/// # Examples
///
/// ```sh
/// # Crawl one site for January 2024
/// awful_funding_news -j ./json --url https://techcrunch.com --from 2024-01-01 --to 2024-01-31
///
/// # Search Google News instead of crawling a site
/// awful_funding_news -j ./json --prompt "fintech seed rounds"
///
/// # Crawl the configured sources, deep crawl allowed
/// awful_funding_news -j ./json --config funding.yaml --deep-crawl
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Output directory for the JSON run reports
    #[arg(short, long, env = "FUNDING_JSON_OUTPUT_DIR")]
    pub json_output_dir: String,

    /// Optional path to the funding settings YAML file
    #[arg(short, long, env = "FUNDING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Optional path to the awful_aj config.yaml (defaults to its config dir)
    #[arg(long, env = "AWFUL_AJ_CONFIG")]
    pub llm_config: Option<PathBuf>,

    /// Site root to crawl; repeat for several sites
    #[arg(short, long = "url")]
    pub urls: Vec<String>,

    /// Natural-language search turned into a news feed target
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Earliest publication date to keep (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Latest publication date to keep (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Strategy tier to try first
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyTier>,

    /// Allow the bounded breadth-first crawl tier
    #[arg(long)]
    pub deep_crawl: bool,

    /// Run every tier and merge their candidates instead of stopping at the first hit
    #[arg(long)]
    pub merge_strategies: bool,

    /// Record store file (overrides `store_path`)
    #[arg(long, env = "FUNDING_STORE")]
    pub store: Option<PathBuf>,
}

impl Cli {
    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.from, self.to)
    }

    /// Apply flag overrides on top of the file settings.
    pub fn apply(&self, settings: &mut Settings) {
        if self.deep_crawl {
            settings.strategy.deep_crawl = true;
        }
        if self.merge_strategies {
            settings.strategy.merge_strategies = true;
        }
        if let Some(store) = &self.store {
            settings.store_path = store.clone();
        }
    }

    /// Crawl targets for this invocation.
    pub fn targets(&self, settings: &Settings) -> Result<Vec<CrawlTarget>, SelectError> {
        let range = self.date_range();
        let mut targets = Vec::new();
        let roots: Vec<&str> = if self.urls.is_empty() && self.prompt.is_none() {
            settings.sources.iter().map(|s| s.url.as_str()).collect()
        } else {
            self.urls.iter().map(String::as_str).collect()
        };
        for root in roots {
            let url = Url::parse(root).map_err(|source| SelectError::InvalidRoot {
                url: root.to_string(),
                source,
            })?;
            targets.push(CrawlTarget::new(url, range, self.strategy));
        }
        if let Some(prompt) = &self.prompt {
            let target = CrawlTarget::from_prompt(prompt, range).map_err(|source| SelectError::InvalidRoot {
                url: prompt.clone(),
                source,
            })?;
            targets.push(target);
        }
        Ok(targets)
    }
}

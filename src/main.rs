//! # Awful Funding News
//!
//! Discovers, fetches and extracts structured funding-event records (company,
//! amount, round, date, source) from arbitrary news sites without per-site
//! scrapers, then deduplicates them against previously stored records.
//!
//! ## Usage
//!
//! ```sh
//! awful_funding_news -j ./json --url https://techcrunch.com --from 2024-01-01
//! awful_funding_news -j ./json --prompt "climate tech series a"
//! ```
//!
//! ## Architecture
//!
//! Each crawl target runs through one pipeline:
//! 1. **Discovery**: sitemap/feed, listing pages, root-page links, then an
//!    optional bounded deep crawl, stopping at the first tier with candidates
//! 2. **Fetching**: concurrent, per-host rate limited, with backoff and
//!    anti-bot detection
//! 3. **Extraction**: boilerplate pruning, then an LLM call returning the
//!    funding fields as JSON, validated and normalized
//! 4. **Dedup**: fuzzy company-name matching against the record store
//! 5. **Output**: a JSON run report per target

use awful_aj::{config as aj_config, config_dir, template};
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dedup;
mod detector;
mod error;
mod extractor;
mod fetcher;
mod http;
mod llm;
mod models;
mod outputs;
mod pipeline;
mod ratelimit;
mod retry;
mod store;
mod strategy;
#[cfg(test)]
mod testing;
mod utils;

use cli::Cli;
use config::Settings;
use dedup::Deduplicator;
use http::ReqwestClient;
use llm::{AwfulJadeModel, GuardedModel};
use pipeline::Pipeline;
use ratelimit::ModelLimiter;
use store::{JsonFileStore, RecordStore};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("awful_funding_news starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.json_output_dir, ?args.config, "Parsed CLI arguments");

    // ---- Settings ----
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    args.apply(&mut settings);
    settings.validate()?;

    // Early check: ensure JSON output dir is writable
    if let Err(e) = ensure_writable_dir(&args.json_output_dir).await {
        error!(
            path = %args.json_output_dir,
            error = %e,
            "JSON output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let targets = args.targets(&settings)?;
    if targets.is_empty() {
        warn!("No targets: pass --url, --prompt or list sources in the settings file");
        return Ok(());
    }
    let range = args.date_range();
    if range.is_unbounded() {
        info!("No date range given; every article is in range");
    } else if let (Some(from), Some(to)) = (range.start, range.end) {
        if from > to {
            warn!(%from, %to, "Date range is empty; every dated article will be skipped");
        }
    }

    // ---- Load template & config ----
    let template = template::load_template(&settings.extraction.template_name).await?;
    info!(template = %settings.extraction.template_name, "Loaded template");
    let conf_file = match &args.llm_config {
        Some(path) => path.clone(),
        None => config_dir()?.join("config.yaml"),
    };
    let config_path = conf_file
        .to_str()
        .ok_or_else(|| format!("Not a valid config filename: {}", conf_file.display()))?;
    let llm_config = aj_config::load_config(config_path)?;
    info!(config_path, "Loaded LLM configuration");

    // ---- Collaborators ----
    let http = Arc::new(ReqwestClient::new(&settings.fetch.user_agent)?);
    let model = GuardedModel::new(
        AwfulJadeModel::new(llm_config, template),
        ModelLimiter::per_minute(settings.extraction.requests_per_minute),
        settings.extraction.retry_policy(),
        settings.extraction.timeout(),
    );
    let store: Arc<dyn RecordStore> = Arc::new(JsonFileStore::open(&settings.store_path).await?);
    let dedup = Deduplicator::load(store, settings.dedup.clone()).await?;
    let pipeline = Pipeline::new(&settings, http, model, dedup);

    // ---- Cancellation ----
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; finishing in-flight work, scheduling nothing new");
                cancel.cancel();
            }
        });
    }

    // ---- Run targets ----
    let mut accepted_total = 0usize;
    let mut failed_targets = 0usize;
    for target in &targets {
        if cancel.is_cancelled() {
            info!(root = %target.root_url, "Skipping target after cancellation");
            continue;
        }
        match pipeline.run(target, &cancel).await {
            Ok(report) => {
                accepted_total += report.summary.accepted + report.summary.merged;
                match outputs::json::write_report(&report, &args.json_output_dir).await {
                    Ok(path) => info!(path = %path.display(), "Report written"),
                    Err(e) => error!(error = %e, "Failed to write report"),
                }
            }
            Err(e) => {
                failed_targets += 1;
                error!(root = %target.root_url, error = %e, "Target produced no candidates");
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        targets = targets.len(),
        failed_targets,
        accepted_total,
        elapsed_secs = elapsed.as_secs_f64(),
        "All targets processed"
    );
    Ok(())
}

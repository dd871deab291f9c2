//! Fuzzy duplicate detection against the stored corpus.
//!
//! Company names are compared with a token-sorted normalized Levenshtein
//! score (0..=100) after lowercasing, punctuation stripping and removal of
//! legal suffixes. Two records match when the score reaches the threshold and
//! they share a source domain or were announced within the date window.
//!
//! The corpus is partitioned by the alphabetically first token of the
//! normalized company name, the same token order [`similarity`] compares, so
//! reordered names ("Robotics Acme" / "Acme Robotics") share a shard.
//! [`Deduplicator::admit`] holds the shard's lock across read-decide-write,
//! so concurrent extractions of the same company are serialized while
//! unrelated companies proceed in parallel. Names whose smallest tokens
//! differ ("Acme Robotics" / "Acmee Robotics") are never compared.

use crate::config::DedupSettings;
use crate::error::StoreError;
use crate::models::{DedupDecision, DedupKey, ExtractedRecord, StoredRecord};
use crate::store::RecordStore;
use crate::utils::{host_of, registrable_domain};
use chrono::Datelike;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};

const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "ltd", "limited", "llc", "llp", "corp", "corporation", "co", "company",
    "gmbh", "ag", "sa", "sas", "sarl", "srl", "spa", "bv", "nv", "plc", "pty", "oy", "ab", "as",
    "kk", "pte", "lp",
];

/// Lowercase, strip punctuation and legal suffixes.
///
/// `"Acme, Inc."` and `"ACME"` both become `"acme"`. A name made only of
/// suffixes keeps its tokens.
pub fn normalize_company_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !LEGAL_SUFFIXES.contains(t))
        .collect();
    if kept.is_empty() { tokens.join(" ") } else { kept.join(" ") }
}

/// Normalized name with its tokens sorted.
fn token_sorted(name: &str) -> String {
    normalize_company_name(name).split_whitespace().sorted().join(" ")
}

/// Shard a company name belongs to: the first token of its sorted form.
pub fn shard_of(company_name: &str) -> String {
    token_sorted(company_name)
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Token-sort similarity of two company names, 0..=100. Symmetric.
pub fn similarity(a: &str, b: &str) -> u8 {
    let (a, b) = (token_sorted(a), token_sorted(b));
    if a == b {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    (strsim::normalized_levenshtein(&a, &b) * 100.0).round() as u8
}

/// Comparison fingerprint of `record`.
pub fn dedup_key(record: &ExtractedRecord, window_days: i64) -> DedupKey {
    let window = window_days.max(1);
    DedupKey {
        normalized_company_name: normalize_company_name(&record.company_name),
        source_domain: host_of(&record.article_url)
            .map(|h| registrable_domain(&h))
            .unwrap_or_default(),
        date_bucket: record
            .raised_date
            .map(|d| i64::from(d.num_days_from_ce()).div_euclid(window)),
    }
}

fn within_window(a: &ExtractedRecord, b: &ExtractedRecord, window_days: i64) -> bool {
    match (a.raised_date, b.raised_date) {
        (Some(x), Some(y)) => (x - y).num_days().abs() <= window_days,
        _ => false,
    }
}

/// Classify `candidate` against `existing`.
///
/// The best-scoring match wins; ties go to the oldest record. A match that
/// only lacks fields the candidate supplies (no conflicting values) and holds
/// fewer of them is merged into; any other match makes the candidate a
/// duplicate.
pub fn is_duplicate(
    candidate: &ExtractedRecord,
    existing: &[StoredRecord],
    settings: &DedupSettings,
) -> DedupDecision {
    let key = dedup_key(candidate, settings.date_window_days);
    let best = existing
        .iter()
        .filter_map(|stored| {
            let score = similarity(&candidate.company_name, &stored.record.company_name);
            if score < settings.threshold {
                return None;
            }
            let other = dedup_key(&stored.record, settings.date_window_days);
            let same_domain = !key.source_domain.is_empty() && key.source_domain == other.source_domain;
            (same_domain || within_window(candidate, &stored.record, settings.date_window_days))
                .then_some((score, stored))
        })
        .min_by(|(sa, a), (sb, b)| sb.cmp(sa).then(a.id.cmp(&b.id)));

    match best {
        None => DedupDecision::Unique,
        Some((_, stored)) => {
            let richer = candidate.populated_count() > stored.record.populated_count();
            if richer && !candidate.conflicts_with(&stored.record) {
                DedupDecision::MergeWith(stored.id)
            } else {
                DedupDecision::DuplicateOf(stored.id)
            }
        }
    }
}

/// Result of admitting one record.
#[derive(Debug, Clone)]
pub struct Admission {
    pub decision: DedupDecision,
    /// The record as persisted; `None` for duplicates.
    pub stored: Option<StoredRecord>,
}

#[derive(Default)]
struct Shard {
    records: Vec<StoredRecord>,
    /// Whether the store has been asked for this shard's full contents.
    probed: bool,
}

/// Shard-locked deduplication in front of a [`RecordStore`].
pub struct Deduplicator {
    store: Arc<dyn RecordStore>,
    settings: DedupSettings,
    shards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Shard>>>>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn RecordStore>, settings: DedupSettings) -> Self {
        Self {
            store,
            settings,
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// Create a deduplicator with the store's recent records cached.
    ///
    /// Records older than `load_window_days` are still consulted: the first
    /// admission into a shard asks the store for that shard's contents.
    #[instrument(level = "info", skip_all, fields(window_days = settings.load_window_days))]
    pub async fn load(store: Arc<dyn RecordStore>, settings: DedupSettings) -> Result<Self, StoreError> {
        let recent = store
            .load_recent(chrono::Duration::days(settings.load_window_days.max(0)))
            .await?;
        let count = recent.len();
        let this = Self::new(store, settings);
        {
            let mut shards = this.shards.lock().unwrap_or_else(PoisonError::into_inner);
            for (shard, records) in recent.into_iter().into_group_map_by(|r| shard_of(&r.record.company_name)) {
                shards.insert(
                    shard,
                    Arc::new(tokio::sync::Mutex::new(Shard { records, probed: false })),
                );
            }
        }
        info!(records = count, "Dedup corpus loaded");
        Ok(this)
    }

    fn shard(&self, name: &str) -> Arc<tokio::sync::Mutex<Shard>> {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards.entry(name.to_string()).or_default().clone()
    }

    /// Decide on `record` and persist the outcome.
    ///
    /// Unique records are inserted, merges rewrite the matched record with the
    /// union of both, duplicates leave the store untouched.
    #[instrument(level = "info", skip_all, fields(company = %record.company_name))]
    pub async fn admit(&self, record: ExtractedRecord) -> Result<Admission, StoreError> {
        let key = dedup_key(&record, self.settings.date_window_days);
        let shard = self.shard(key.shard());
        let mut shard = shard.lock().await;

        if !shard.probed {
            let known = self.store.exists_similar(&key).await?;
            for stored in known {
                if !shard.records.iter().any(|r| r.id == stored.id) {
                    shard.records.push(stored);
                }
            }
            shard.probed = true;
        }

        let decision = is_duplicate(&record, &shard.records, &self.settings);
        let stored = match decision {
            DedupDecision::DuplicateOf(id) => {
                debug!(%id, "duplicate rejected");
                None
            }
            DedupDecision::Unique => {
                let id = self.store.upsert(&record, None).await?;
                let stored = StoredRecord {
                    id,
                    stored_at: chrono::Utc::now(),
                    record,
                };
                shard.records.push(stored.clone());
                Some(stored)
            }
            DedupDecision::MergeWith(id) => {
                let mut merged = record;
                if let Some(existing) = shard.records.iter().find(|r| r.id == id) {
                    merged.fill_from(&existing.record);
                }
                self.store.upsert(&merged, Some(id)).await?;
                let stored = StoredRecord {
                    id,
                    stored_at: chrono::Utc::now(),
                    record: merged,
                };
                if let Some(slot) = shard.records.iter_mut().find(|r| r.id == id) {
                    *slot = stored.clone();
                }
                debug!(%id, "merged into existing record");
                Some(stored)
            }
        };
        Ok(Admission { decision, stored })
    }
}

//! Data models shared by every stage of the funding pipeline.
//!
//! - [`CrawlTarget`]: what a run was asked to crawl
//! - [`CandidateUrl`]: an article URL a strategy tier discovered
//! - [`FetchResult`]: the terminal fetch outcome for one candidate
//! - [`ExtractedRecord`]: a normalized funding event
//! - [`DedupKey`]: the comparison fingerprint of a record (never persisted)
//!
//! Optional record fields serialize as `null`; empty strings are never used
//! as placeholders.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// One fallback method in the discovery chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    /// `sitemap.xml`, sitemap indexes and RSS/Atom feeds.
    Sitemap,
    /// Navigation links to listing pages such as `/news` or `/funding`.
    Listing,
    /// Article-looking anchors on the root page alone.
    Generic,
    /// Bounded breadth-first traversal scored by anchor keywords.
    Deep,
}

impl StrategyTier {
    pub const ALL: [StrategyTier; 4] = [
        StrategyTier::Sitemap,
        StrategyTier::Listing,
        StrategyTier::Generic,
        StrategyTier::Deep,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StrategyTier::Sitemap => "sitemap",
            StrategyTier::Listing => "listing",
            StrategyTier::Generic => "generic",
            StrategyTier::Deep => "deep",
        }
    }

    /// How much a candidate from this tier is trusted to be an article.
    pub fn confidence(self) -> f32 {
        match self {
            StrategyTier::Sitemap => 0.9,
            StrategyTier::Listing => 0.75,
            StrategyTier::Generic => 0.5,
            StrategyTier::Deep => 0.3,
        }
    }
}

impl fmt::Display for StrategyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive publication-date window. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }

    /// Undated entries are kept: absence of a date is not evidence of age.
    pub fn admits(&self, date: Option<NaiveDate>) -> bool {
        date.is_none_or(|d| self.contains(d))
    }
}

/// A crawl request. Immutable once built; consumed once by the selector.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub root_url: Url,
    pub date_range: DateRange,
    pub strategy_hint: Option<StrategyTier>,
}

impl CrawlTarget {
    pub fn new(root_url: Url, date_range: DateRange, strategy_hint: Option<StrategyTier>) -> Self {
        Self {
            root_url,
            date_range,
            strategy_hint,
        }
    }

    /// Turn a natural-language request into a Google News RSS search feed.
    pub fn from_prompt(prompt: &str, date_range: DateRange) -> Result<Self, url::ParseError> {
        let query = urlencoding::encode(prompt.trim());
        let feed = format!("https://news.google.com/rss/search?q={query}&hl=en-US&gl=US&ceid=US:en");
        Ok(Self::new(Url::parse(&feed)?, date_range, Some(StrategyTier::Sitemap)))
    }
}

/// An article URL produced by a strategy tier.
///
/// `rank` is the position in the selector output: higher-confidence tiers
/// come first and document order breaks ties within a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateUrl {
    pub url: String,
    pub discovered_via: StrategyTier,
    pub discovery_rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Blocked,
    Failed,
}

/// Terminal fetch outcome for exactly one candidate.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub candidate: CandidateUrl,
    pub status: FetchStatus,
    pub raw_content: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl FetchResult {
    #[cfg(test)]
    pub fn url(&self) -> &str {
        &self.candidate.url
    }
}

/// Fields the model can be asked to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingField {
    RaisedDate,
    CompanyName,
    AmountRaised,
    FundingRound,
    Industry,
    Website,
    Linkedin,
}

/// Semantic type a model value is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Date,
    Amount,
    Url,
}

impl FundingField {
    pub fn key(self) -> &'static str {
        match self {
            FundingField::RaisedDate => "raised_date",
            FundingField::CompanyName => "company_name",
            FundingField::AmountRaised => "amount_raised",
            FundingField::FundingRound => "funding_round",
            FundingField::Industry => "industry",
            FundingField::Website => "website",
            FundingField::Linkedin => "linkedin",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            FundingField::RaisedDate => FieldKind::Date,
            FundingField::AmountRaised => FieldKind::Amount,
            FundingField::Website | FundingField::Linkedin => FieldKind::Url,
            _ => FieldKind::Text,
        }
    }

    fn hint(self) -> &'static str {
        match self {
            FundingField::RaisedDate => "date the funding was announced, YYYY-MM-DD",
            FundingField::CompanyName => "name of the company that raised money",
            FundingField::AmountRaised => "amount raised including currency, e.g. \"$6.6 million\"",
            FundingField::FundingRound => "round type, e.g. Seed, Series A",
            FundingField::Industry => "industry or sector of the company",
            FundingField::Website => "official company website URL",
            FundingField::Linkedin => "company LinkedIn page URL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub field: FundingField,
    pub kind: FieldKind,
    pub required: bool,
}

/// The enumerated schema handed to the model and checked after it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTemplate {
    pub fields: Vec<FieldSpec>,
}

impl FieldTemplate {
    /// Build a template for `fields`. `company_name` is always present and required.
    pub fn from_fields(fields: &[FundingField]) -> Self {
        let mut specs = vec![FieldSpec {
            field: FundingField::CompanyName,
            kind: FieldKind::Text,
            required: true,
        }];
        for &field in fields {
            if specs.iter().any(|s| s.field == field) {
                continue;
            }
            specs.push(FieldSpec {
                field,
                kind: field.kind(),
                required: false,
            });
        }
        Self { fields: specs }
    }

    pub fn funding() -> Self {
        Self::from_fields(&[
            FundingField::RaisedDate,
            FundingField::AmountRaised,
            FundingField::FundingRound,
            FundingField::Industry,
            FundingField::Website,
            FundingField::Linkedin,
        ])
    }

    pub fn requests(&self, field: FundingField) -> bool {
        self.fields.iter().any(|s| s.field == field)
    }

    /// Plain-text instructions describing the expected JSON object.
    pub fn instructions(&self) -> String {
        let mut out = String::from(
            "Return ONLY a JSON object with exactly these keys. Use null when the article does not state a value.\n{\n",
        );
        for (i, spec) in self.fields.iter().enumerate() {
            let sep = if i + 1 == self.fields.len() { "" } else { "," };
            let required = if spec.required { " (required)" } else { "" };
            out.push_str(&format!(
                "  \"{}\": <{}{}>{}\n",
                spec.field.key(),
                spec.field.hint(),
                required,
                sep
            ));
        }
        out.push('}');
        out
    }
}

impl Default for FieldTemplate {
    fn default() -> Self {
        Self::funding()
    }
}

/// A normalized funding event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub raised_date: Option<NaiveDate>,
    pub company_name: String,
    /// Whole currency units.
    pub amount_raised: Option<u64>,
    /// ISO 4217 code accompanying `amount_raised`.
    pub currency: Option<String>,
    pub funding_round: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub linkedin: Option<String>,
    pub article_url: String,
    pub source_name: String,
    pub extraction_confidence: f32,
}

impl ExtractedRecord {
    /// Number of populated optional payload fields.
    pub fn populated_count(&self) -> usize {
        [
            self.raised_date.is_some(),
            self.amount_raised.is_some(),
            self.funding_round.is_some(),
            self.industry.is_some(),
            self.website.is_some(),
            self.linkedin.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count()
    }

    /// True when any payload field is set on both sides with different values.
    pub fn conflicts_with(&self, other: &ExtractedRecord) -> bool {
        fn differ<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x != y)
        }
        fn differ_text(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if !x.eq_ignore_ascii_case(y))
        }
        differ(&self.raised_date, &other.raised_date)
            || differ(&self.amount_raised, &other.amount_raised)
            || differ_text(&self.funding_round, &other.funding_round)
            || differ_text(&self.industry, &other.industry)
            || differ_text(&self.website, &other.website)
            || differ_text(&self.linkedin, &other.linkedin)
    }

    /// Fill every empty payload field of `self` from `other`.
    pub fn fill_from(&mut self, other: &ExtractedRecord) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.raised_date, &other.raised_date);
        if self.amount_raised.is_none() {
            self.amount_raised = other.amount_raised;
            self.currency.clone_from(&other.currency);
        }
        fill(&mut self.funding_round, &other.funding_round);
        fill(&mut self.industry, &other.industry);
        fill(&mut self.website, &other.website);
        fill(&mut self.linkedin, &other.linkedin);
        self.extraction_confidence = self.extraction_confidence.max(other.extraction_confidence);
    }
}

/// Identifier assigned by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A record as held by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub stored_at: chrono::DateTime<chrono::Utc>,
    pub record: ExtractedRecord,
}

/// Comparison fingerprint of a record. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub normalized_company_name: String,
    pub source_domain: String,
    /// Index of the date-window bucket the raised date falls in.
    pub date_bucket: Option<i64>,
}

impl DedupKey {
    /// Shard the key belongs to: the alphabetically first token of the
    /// normalized name.
    pub fn shard(&self) -> &str {
        self.normalized_company_name.split_whitespace().min().unwrap_or("")
    }
}

/// Outcome of comparing a candidate record against the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "id")]
pub enum DedupDecision {
    Unique,
    DuplicateOf(RecordId),
    MergeWith(RecordId),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(name: &str) -> ExtractedRecord {
        ExtractedRecord {
            raised_date: None,
            company_name: name.to_string(),
            amount_raised: None,
            currency: None,
            funding_round: None,
            industry: None,
            website: None,
            linkedin: None,
            article_url: "https://techcrunch.com/2024/01/10/acme-raises".to_string(),
            source_name: "TechCrunch".to_string(),
            extraction_confidence: 0.5,
        }
    }

    #[test]
    fn test_date_range_admits_undated_entries() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 1, 31),
        );
        assert!(range.admits(None));
        assert!(range.admits(NaiveDate::from_ymd_opt(2024, 1, 31)));
        assert!(!range.admits(NaiveDate::from_ymd_opt(2024, 2, 1)));
        assert!(DateRange::default().is_unbounded());
    }

    #[test]
    fn test_from_prompt_builds_search_feed() {
        let target = CrawlTarget::from_prompt("AI startup seed rounds", DateRange::default()).unwrap();
        assert_eq!(target.root_url.host_str(), Some("news.google.com"));
        assert!(target.root_url.as_str().contains("q=AI%20startup%20seed%20rounds"));
        assert_eq!(target.strategy_hint, Some(StrategyTier::Sitemap));
    }

    #[test]
    fn test_template_always_requires_company_name() {
        let template = FieldTemplate::from_fields(&[FundingField::AmountRaised, FundingField::CompanyName]);
        assert_eq!(template.fields.len(), 2);
        assert!(template.fields[0].required);
        assert_eq!(template.fields[0].field, FundingField::CompanyName);
        assert_eq!(template.fields[1].kind, FieldKind::Amount);
        assert!(template.instructions().contains("\"amount_raised\""));
    }

    #[test]
    fn test_record_serializes_nulls_not_empty_strings() {
        let json = serde_json::to_value(record("Acme")).unwrap();
        assert!(json["industry"].is_null());
        assert!(json["raised_date"].is_null());
        assert_eq!(json["company_name"], "Acme");
    }

    #[test]
    fn test_conflict_and_fill() {
        let mut a = record("Acme");
        a.funding_round = Some("Seed".into());
        let mut b = record("Acme");
        b.funding_round = Some("seed".into());
        b.amount_raised = Some(5_000_000);
        b.currency = Some("USD".into());
        assert!(!a.conflicts_with(&b));
        a.fill_from(&b);
        assert_eq!(a.amount_raised, Some(5_000_000));
        assert_eq!(a.populated_count(), 2);

        b.funding_round = Some("Series A".into());
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn test_dedup_key_shard_is_smallest_token() {
        let key = DedupKey {
            normalized_company_name: "robotics acme".into(),
            source_domain: "techcrunch.com".into(),
            date_bucket: None,
        };
        assert_eq!(key.shard(), "acme");
    }
}

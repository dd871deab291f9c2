//! Turns a fetched article page into a validated [`ExtractedRecord`].
//!
//! The page is reduced to readable text ([`clean`]), checked for length and
//! funding vocabulary, then handed to the language model together with the
//! field template. The model's JSON is validated field by field against the
//! template's semantic types; values that cannot be repaired
//! ([`normalize`]) are nulled instead of failing the whole record.

pub mod clean;
pub mod normalize;

use crate::config::{ExtractionSettings, SourceEntry, source_name};
use crate::error::ExtractionFailure;
use crate::llm::LanguageModel;
use crate::models::{ExtractedRecord, FieldKind, FieldSpec, FieldTemplate, FundingField};
use crate::strategy::links::date_from_url;
use crate::utils::{funding_keyword_hits, host_of, looks_truncated, registrable_domain, truncate_for_log};
use chrono::NaiveDate;
use clean::{CleanedPage, clean_html};
use normalize::{
    canonical_round, clean_text, link_matches_company, normalize_currency, normalize_linkedin, normalize_url,
    parse_amount, parse_date,
};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

/// A model value coerced to its field's semantic type.
#[derive(Debug, PartialEq)]
enum Coerced {
    Text(String),
    Date(NaiveDate),
    Amount(u64, Option<String>),
    Url(String),
}

enum ReplyError {
    Truncated(serde_json::Error),
    Malformed,
}

/// Extraction step of the pipeline, generic over the model collaborator.
pub struct ContentExtractor<M> {
    model: M,
    settings: ExtractionSettings,
    sources: Vec<SourceEntry>,
}

impl<M: LanguageModel> ContentExtractor<M> {
    pub fn new(model: M, settings: ExtractionSettings, sources: Vec<SourceEntry>) -> Self {
        Self {
            model,
            settings,
            sources,
        }
    }

    #[cfg(test)]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Template built from the configured field list.
    pub fn template(&self) -> FieldTemplate {
        FieldTemplate::from_fields(&self.settings.fields)
    }

    /// Extract one record from `raw_content` fetched at `article_url`.
    ///
    /// Exactly one model call is made per page, plus one re-ask when the
    /// reply was cut off mid-JSON.
    #[instrument(level = "info", skip_all, fields(url = %article_url))]
    pub async fn extract(
        &self,
        article_url: &str,
        raw_content: &str,
        template: &FieldTemplate,
    ) -> Result<ExtractedRecord, ExtractionFailure> {
        if article_url.trim().is_empty() {
            return Err(ExtractionFailure::InsufficientContent("article has no URL".into()));
        }
        let page = clean_html(raw_content);
        let chars = page.text.chars().count();
        if chars < self.settings.min_content_chars {
            return Err(ExtractionFailure::InsufficientContent(format!(
                "cleaned text has {chars} chars, need {}",
                self.settings.min_content_chars
            )));
        }
        if self.settings.require_funding_keywords {
            let title = page.title.as_deref().unwrap_or_default();
            if funding_keyword_hits(title) + funding_keyword_hits(&page.text) == 0 {
                debug!("no funding vocabulary; skipping model call");
                return Err(ExtractionFailure::NotFundingRelated);
            }
        }

        let prompt = self.prompt(article_url, &page);
        let reply = self.model.complete(&prompt, template).await?;
        let fields = match parse_reply(&reply) {
            Ok(fields) => fields,
            Err(ReplyError::Truncated(e)) => {
                warn!(error = %e, "EOF while parsing; re-asking once");
                let retry = self.model.complete(&prompt, template).await?;
                parse_reply(&retry).map_err(|_| malformed(&retry))?
            }
            Err(ReplyError::Malformed) => return Err(malformed(&reply)),
        };

        let record = self.build_record(&fields, template, article_url, &page)?;
        info!(
            company = %record.company_name,
            confidence = record.extraction_confidence,
            "extracted record"
        );
        Ok(record)
    }

    fn prompt(&self, article_url: &str, page: &CleanedPage) -> String {
        let body: String = page.text.chars().take(self.settings.max_content_chars).collect();
        format!(
            "Source URL: {}\nTitle: {}\n\nARTICLE:\n{}",
            article_url,
            page.title.as_deref().unwrap_or("(none)"),
            body
        )
    }

    fn build_record(
        &self,
        fields: &Map<String, Value>,
        template: &FieldTemplate,
        article_url: &str,
        page: &CleanedPage,
    ) -> Result<ExtractedRecord, ExtractionFailure> {
        let host = host_of(article_url).unwrap_or_default();
        let mut record = ExtractedRecord {
            raised_date: None,
            company_name: String::new(),
            amount_raised: None,
            currency: None,
            funding_round: None,
            industry: None,
            website: None,
            linkedin: None,
            article_url: article_url.to_string(),
            source_name: source_name(&self.sources, &host)
                .map(str::to_string)
                .unwrap_or_else(|| registrable_domain(&host)),
            extraction_confidence: 0.0,
        };

        let mut populated = 0usize;
        for spec in &template.fields {
            let Some(value) = fields.get(spec.field.key()).and_then(|v| coerce(spec, v)) else {
                if fields.get(spec.field.key()).is_some_and(|v| !v.is_null()) {
                    debug!(field = spec.field.key(), "dropping implausible value");
                }
                continue;
            };
            populated += 1;
            match (spec.field, value) {
                (FundingField::CompanyName, Coerced::Text(t)) => record.company_name = t,
                (FundingField::RaisedDate, Coerced::Date(d)) => record.raised_date = Some(d),
                (FundingField::AmountRaised, Coerced::Amount(amount, currency)) => {
                    record.amount_raised = Some(amount);
                    record.currency = currency.or_else(|| {
                        fields
                            .get("currency")
                            .and_then(Value::as_str)
                            .and_then(normalize_currency)
                    });
                }
                (FundingField::FundingRound, Coerced::Text(t)) => record.funding_round = Some(t),
                (FundingField::Industry, Coerced::Text(t)) => record.industry = Some(t),
                (FundingField::Website, Coerced::Url(u)) => record.website = Some(u),
                (FundingField::Linkedin, Coerced::Url(u)) => record.linkedin = Some(u),
                _ => populated -= 1,
            }
        }

        if record.company_name.is_empty() {
            return Err(ExtractionFailure::InsufficientContent(
                "model returned no company_name".into(),
            ));
        }
        let company = record.company_name.as_str();
        for (field, slot) in [("website", &mut record.website), ("linkedin", &mut record.linkedin)] {
            if slot.as_deref().is_some_and(|link| !link_matches_company(company, link)) {
                debug!(field, link = ?slot, "dropping link unrelated to the company");
                *slot = None;
                populated -= 1;
            }
        }
        record.extraction_confidence = populated as f32 / template.fields.len().max(1) as f32;
        if record.raised_date.is_none() && template.requests(FundingField::RaisedDate) {
            record.raised_date = page.published.or_else(|| date_from_url(article_url));
        }
        Ok(record)
    }
}

fn malformed(reply: &str) -> ExtractionFailure {
    ExtractionFailure::MalformedResponse {
        preview: truncate_for_log(reply.trim(), 200),
    }
}

/// The JSON object inside `reply`, tolerating code fences and prose around it.
fn json_body(reply: &str) -> &str {
    let Some(start) = reply.find('{') else {
        return reply.trim();
    };
    match reply.rfind('}') {
        Some(end) if end > start => &reply[start..=end],
        _ => &reply[start..],
    }
}

fn parse_reply(reply: &str) -> Result<Map<String, Value>, ReplyError> {
    match serde_json::from_str::<Value>(json_body(reply)) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ReplyError::Malformed),
        Err(e) if looks_truncated(&e) => Err(ReplyError::Truncated(e)),
        Err(_) => Err(ReplyError::Malformed),
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(text_value).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}

fn amount_value(value: &Value) -> Option<(u64, Option<String>)> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 1.0).map(|f| f.round() as u64))
            .filter(|&a| a > 0)
            .map(|a| (a, None)),
        Value::String(s) => parse_amount(s),
        Value::Object(o) => {
            let (amount, currency) = o
                .get("amount")
                .or_else(|| o.get("value"))
                .and_then(amount_value)?;
            let currency = currency.or_else(|| {
                o.get("currency")
                    .and_then(Value::as_str)
                    .and_then(normalize_currency)
            });
            Some((amount, currency))
        }
        _ => None,
    }
}

/// Validate `value` against the semantic type of `spec`.
fn coerce(spec: &FieldSpec, value: &Value) -> Option<Coerced> {
    match spec.kind {
        FieldKind::Text if spec.field == FundingField::FundingRound => {
            value.as_str().and_then(canonical_round).map(Coerced::Text)
        }
        FieldKind::Text => text_value(value).map(Coerced::Text),
        FieldKind::Date => value.as_str().and_then(parse_date).map(Coerced::Date),
        FieldKind::Amount => amount_value(value).map(|(a, c)| Coerced::Amount(a, c)),
        FieldKind::Url if spec.field == FundingField::Linkedin => {
            value.as_str().and_then(normalize_linkedin).map(Coerced::Url)
        }
        FieldKind::Url => value.as_str().and_then(normalize_url).map(Coerced::Url),
    }
}

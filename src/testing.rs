//! In-process fakes for every external collaborator.
//!
//! Nothing here touches the network or the file system, so pipeline tests are
//! deterministic and fast.

use crate::error::{HttpError, LlmError, StoreError};
use crate::http::{HttpClient, HttpResponse};
use crate::llm::LanguageModel;
use crate::models::{DedupKey, ExtractedRecord, FieldTemplate, RecordId, StoredRecord};
use crate::store::RecordStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub fn html(body: impl Into<String>) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse {
        status: 200,
        headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
        body: body.into(),
    })
}

pub fn xml(body: impl Into<String>) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse {
        status: 200,
        headers: HashMap::from([("content-type".to_string(), "application/xml".to_string())]),
        body: body.into(),
    })
}

pub fn status(code: u16, body: impl Into<String>) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse {
        status: code,
        headers: HashMap::new(),
        body: body.into(),
    })
}

/// A long enough article page to pass the detector's size check.
pub fn article_page(title: &str, text: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a><a href=\"/news\">News</a></nav>\
         <article><h1>{title}</h1><p>{text}</p>{}</article>\
         <footer>Copyright</footer></body></html>",
        "<p>Founded a few years ago, the company builds tools for teams of every size.</p>".repeat(6)
    )
}

/// Scripted HTTP fake.
///
/// Each URL maps to a queue of responses; the last one repeats once the queue
/// is drained. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockHttp {
    routes: Mutex<HashMap<String, VecDeque<Result<HttpResponse, HttpError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    starts: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
    deadline: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail with a timeout when the call is not driven to completion within
    /// `deadline`, the way a real client checks its timer before reading a
    /// response that already arrived.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn route(self, url: &str, response: Result<HttpResponse, HttpError>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of concurrent `get` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Request start times for every URL on `host`.
    pub fn starts_for_host(&self, host: &str) -> Vec<Instant> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| crate::utils::host_of(url).as_deref() == Some(host))
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn get(
        &self,
        url: &str,
        _headers: &[(String, String)],
        _timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let started = Instant::now();
        self.starts.lock().unwrap().push((url.to_string(), started));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.deadline.is_some_and(|d| started.elapsed() > d) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(HttpError::Timeout { url: url.to_string() });
        }

        let response = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap(),
                None => status(404, "not found"),
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Scripted language model.
///
/// Rules match on a substring of the prompt; the first match wins. Each rule
/// holds a queue of replies whose last entry repeats.
#[derive(Default)]
pub struct MockModel {
    rules: Mutex<Vec<(String, VecDeque<Result<String, LlmError>>)>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(self, prompt_contains: &str, reply: Result<String, LlmError>) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|(needle, _)| needle == prompt_contains) {
                Some((_, queue)) => queue.push_back(reply),
                None => rules.push((prompt_contains.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    pub fn otherwise(mut self, reply: &str) -> Self {
        self.fallback = Some(reply.to_string());
        self
    }

    /// Every reply is delayed by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `complete` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reply(&self, prompt: &str) -> Result<String, LlmError> {
        let mut rules = self.rules.lock().unwrap();
        if let Some((_, queue)) = rules.iter_mut().find(|(needle, _)| prompt.contains(needle.as_str())) {
            return if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
        }
        self.fallback
            .clone()
            .ok_or_else(|| LlmError::Api("no scripted reply".to_string()))
    }
}

impl LanguageModel for MockModel {
    async fn complete(&self, prompt: &str, _schema: &FieldTemplate) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = self.reply(prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

/// Record store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    records: tokio::sync::Mutex<Vec<StoredRecord>>,
    upserts: AtomicUsize,
    similar_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().await.clone()
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn similar_queries(&self) -> usize {
        self.similar_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn exists_similar(&self, key: &DedupKey) -> Result<Vec<StoredRecord>, StoreError> {
        self.similar_queries.fetch_add(1, Ordering::SeqCst);
        let shard = key.shard().to_string();
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| crate::dedup::dedup_key(&r.record, 30).shard() == shard)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: &ExtractedRecord, id: Option<RecordId>) -> Result<RecordId, StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().await;
        match id {
            Some(id) => {
                let slot = records
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or(StoreError::UnknownRecord(id.0))?;
                slot.record = record.clone();
                Ok(id)
            }
            None => {
                let id = RecordId(records.len() as u64 + 1);
                records.push(StoredRecord {
                    id,
                    stored_at: chrono::Utc::now(),
                    record: record.clone(),
                });
                Ok(id)
            }
        }
    }

    async fn load_recent(&self, window: chrono::Duration) -> Result<Vec<StoredRecord>, StoreError> {
        let cutoff = chrono::Utc::now() - window;
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.stored_at >= cutoff)
            .cloned()
            .collect())
    }
}

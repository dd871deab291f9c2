//! The HTTP collaborator: one GET with headers and a timeout.
//!
//! Discovery and fetch only see [`HttpClient`], so tests drive them with an
//! in-process fake and the binary uses [`ReqwestClient`].

use crate::error::HttpError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError>;
}

/// Production client backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }

    fn classify(url: &str, e: reqwest::Error) -> HttpError {
        let url = url.to_string();
        if e.is_timeout() {
            HttpError::Timeout { url }
        } else if e.is_connect() {
            HttpError::Connect { url, detail: e.to_string() }
        } else if e.is_body() || e.is_decode() {
            HttpError::Body { url, detail: e.to_string() }
        } else if e.is_builder() {
            HttpError::InvalidUrl { url }
        } else {
            HttpError::Other { url, detail: e.to_string() }
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| Self::classify(url, e))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| Self::classify(url, e))?;
        debug!(status, bytes = body.len(), "HTTP response received");

        Ok(HttpResponse { status, headers, body })
    }
}

//! Language-model interaction with rate limiting, timeouts and backoff.
//!
//! - [`LanguageModel`]: core trait, `complete(prompt, schema) -> raw reply`
//! - [`AwfulJadeModel`]: adapts `awful_aj::api::ask` to the trait
//! - [`GuardedModel`]: decorator adding the per-minute quota, a per-call
//!   timeout and retries on rate-limit/timeout/unavailable errors
//!
//! The backoff used here is configured separately from the fetcher's, so a
//! throttled model endpoint never slows down page fetching.

use crate::error::LlmError;
use crate::models::FieldTemplate;
use crate::ratelimit::ModelLimiter;
use crate::retry::RetryPolicy;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// A structured-completion endpoint.
///
/// Implementations return the model's raw reply; validation against `schema`
/// happens in the extractor.
pub trait LanguageModel {
    async fn complete(&self, prompt: &str, schema: &FieldTemplate) -> Result<String, LlmError>;
}

/// Wrapper around `awful_aj::api::ask`.
pub struct AwfulJadeModel {
    config: AwfulJadeConfig,
    template: ChatTemplate,
}

impl AwfulJadeModel {
    pub fn new(config: AwfulJadeConfig, template: ChatTemplate) -> Self {
        Self { config, template }
    }

    /// The text actually sent: field instructions followed by the article.
    pub fn compose(prompt: &str, schema: &FieldTemplate) -> String {
        format!("{}\n\n{}", schema.instructions(), prompt)
    }
}

impl fmt::Debug for AwfulJadeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulJadeModel").finish_non_exhaustive()
    }
}

impl LanguageModel for AwfulJadeModel {
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, prompt: &str, schema: &FieldTemplate) -> Result<String, LlmError> {
        let t0 = Instant::now();
        let text = Self::compose(prompt, schema);
        match ask(&self.config, text, &self.template, None, None).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                let message = e.to_string();
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %message, "API call failed");
                Err(LlmError::classify(&message))
            }
        }
    }
}

/// Decorator enforcing the model quota, a per-call timeout and retries.
pub struct GuardedModel<M> {
    inner: M,
    limiter: ModelLimiter,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<M> GuardedModel<M> {
    pub fn new(inner: M, limiter: ModelLimiter, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            limiter,
            retry,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M> fmt::Debug for GuardedModel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedModel")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<M: LanguageModel> LanguageModel for GuardedModel<M> {
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, prompt: &str, schema: &FieldTemplate) -> Result<String, LlmError> {
        let t0 = Instant::now();
        let (result, attempts) = self
            .retry
            .run(
                "model_complete",
                move |_| async move {
                    self.limiter.acquire().await;
                    match tokio::time::timeout(self.timeout, self.inner.complete(prompt, schema)).await {
                        Ok(result) => result,
                        Err(_) => Err(LlmError::Timeout),
                    }
                },
                LlmError::is_retryable,
            )
            .await;
        if result.is_ok() {
            info!(
                attempts,
                elapsed_ms_total = t0.elapsed().as_millis() as u64,
                "model call succeeded"
            );
        }
        result
    }
}

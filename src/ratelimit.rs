//! Politeness and quota limiters built on the governor crate.
//!
//! [`HostLimiter`] keeps a minimum interval between request starts to the same
//! host. [`ModelLimiter`] caps language-model calls per minute across the run.

use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Per-host spacing. A zero interval disables limiting.
#[derive(Clone)]
pub struct HostLimiter {
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
}

impl HostLimiter {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::keyed(quota)));
        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until a request to `host` may start.
    pub async fn acquire(&self, host: &str) {
        if let Some(limiter) = &self.limiter {
            let key = host.trim_start_matches("www.").to_ascii_lowercase();
            limiter.until_key_ready(&key).await;
            trace!(host = %key, "host permit acquired");
        }
    }
}

impl std::fmt::Debug for HostLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLimiter")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

/// Requests-per-minute quota for the language model, shared by all workers.
#[derive(Clone)]
pub struct ModelLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl ModelLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for ModelLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_same_host_requests_are_spaced() {
        let limiter = HostLimiter::new(Duration::from_millis(60));
        let t0 = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("www.example.com").await;
        limiter.acquire("example.com").await;
        assert!(t0.elapsed() >= Duration::from_millis(115));
    }

    #[tokio::test]
    async fn test_distinct_hosts_do_not_wait_on_each_other() {
        let limiter = HostLimiter::new(Duration::from_secs(5));
        let t0 = Instant::now();
        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_interval_disables_limiting() {
        let limiter = HostLimiter::new(Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..100 {
            limiter.acquire("example.com").await;
        }
        assert!(t0.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_model_limiter_allows_burst_up_to_quota() {
        let limiter = ModelLimiter::per_minute(600);
        let t0 = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(t0.elapsed() < Duration::from_millis(500));
    }
}

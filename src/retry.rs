//! Exponential backoff with jitter for any fallible async operation.
//!
//! The delay before retry `n` (zero-based) is
//!
//! ```text
//! delay = min(base_delay * 2^n, max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! Callers decide which errors are worth another attempt; permanent errors
//! are returned immediately.

use rand::{Rng, rng};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts never exceed `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the zero-based attempt number. Returns the last result
    /// together with the number of attempts made.
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, retryable: R) -> (Result<T, E>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;
        loop {
            let attempt_t0 = Instant::now();
            let result = op(attempt).await;
            attempt += 1;
            let err = match result {
                Ok(value) => return (Ok(value), attempt),
                Err(e) => e,
            };

            if !retryable(&err) {
                return (Err(err), attempt);
            }
            if attempt >= self.max_attempts() {
                error!(
                    label,
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %err,
                    "exhausted retries"
                );
                return (Err(err), attempt);
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                label,
                attempt,
                max = self.max_retries,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                ?delay,
                error = %err,
                "attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

//! Timeout, retry and cancellation for capability calls
//!
//! Every completion and embedding call goes through a `CallPolicy`:
//!
//! - each attempt runs under a deadline; an expired deadline becomes
//!   `Error::Timeout`
//! - transient failures are retried with exponential backoff plus ±25%
//!   jitter, up to `max_attempts` in total
//! - a cancelled token aborts the pending attempt or backoff sleep with
//!   `Error::Cancelled`

use crate::config::CapabilityConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry and deadline policy for one class of capability call
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Deadline per attempt
    pub timeout: Duration,
    /// Attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
}

impl CallPolicy {
    /// Policy for extraction, judgment, rewrite and summarization
    pub fn completion(config: &CapabilityConfig) -> Self {
        Self::with_timeout(config, config.completion_timeout())
    }

    /// Policy for embedding calls
    pub fn embedding(config: &CapabilityConfig) -> Self {
        Self::with_timeout(config, config.embedding_timeout())
    }

    /// Policy for deep-mode reasoning
    pub fn reasoning(config: &CapabilityConfig) -> Self {
        Self::with_timeout(config, config.reasoning_timeout())
    }

    fn with_timeout(config: &CapabilityConfig, timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay after the given failed attempt (1-based), jittered by ±25%.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = base.saturating_mul(1u64 << exponent);
        let capped = raw.min(self.backoff_max.as_millis() as u64);
        Duration::from_millis(apply_jitter(capped))
    }

    /// Run `call` under this policy.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: Option<&CancellationToken>,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let outcome = match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        r = tokio::time::timeout(self.timeout, call()) => r,
                    }
                }
                None => tokio::time::timeout(self.timeout, call()).await,
            };

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout {
                    operation: operation.to_string(),
                    after: self.timeout,
                },
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            tracing::warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Capability call failed, retrying"
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::completion(&CapabilityConfig::default())
    }
}

fn apply_jitter(base_ms: u64) -> u64 {
    let range = base_ms / 4;
    if range == 0 {
        return base_ms;
    }
    let low = base_ms - range;
    let high = base_ms + range;
    rand::thread_rng().gen_range(low..=high)
}

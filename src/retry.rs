//! Exponential backoff with jitter around provider calls.
//!
//! Every external call goes through [`with_retry`]. Each attempt runs under
//! `tokio::time::timeout`; an elapsed timeout counts as a retryable failure
//! the same way throttling and transient errors do. Fatal errors return
//! immediately.
//!
//! Delay before retry `n` (1-based) is `min(base * 2^(n-1), max)`, plus a
//! uniform extra in `[0, delay / 2)` when jitter is enabled.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pillar_audit_core::error::ProviderError;

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Backoff before retry `n` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(30);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    fn delay(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if !self.jitter {
            return delay;
        }
        let half_ms = delay.as_millis() as u64 / 2;
        if half_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(entropy() % half_ms)
    }
}

/// Per-call entropy from the clock.
fn entropy() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

/// Run `op` until it succeeds, fails fatally, or attempts run out.
///
/// On exhaustion the last retryable error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            let delay = policy.delay(attempt - 1);
            tracing::debug!(
                call = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off"
            );
            tokio::time::sleep(delay).await;
        }

        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::warn!(call = label, attempt, error = %e, "retryable provider failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::Fatal(format!("{}: no attempts made", label))))
}

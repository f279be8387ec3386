//! Reliability decorator around any [`GenerateBackend`].
//!
//! Order per call: circuit check → budget check → rate-limit acquire →
//! HTTP call. Retryable failures back off exponentially with jitter up
//! to the attempt cap; quota exhaustion trips the circuit and surfaces
//! immediately so the cascade can escalate. Cancellation aborts waits
//! and in-flight calls and is never treated as a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CapacityLimiter, CircuitBreaker, CostTracker};
use crate::error::{BackendError, Result};
use crate::traits::GenerateBackend;
use crate::types::{estimate_tokens, GenerateOutput, GenerateParams};

/// Backoff and retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per generate call (first try included).
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,

    /// Backoff ceiling.
    pub max_delay: Duration,

    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// `min(base · 2^(attempt-1) + jitter, cap)` for 1-based attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(1 << exponent);
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter.as_millis() as u64)
        };
        (base + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Per-call token pricing, in milli-USD per 1k tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPricing {
    pub milli_per_1k_in: i64,
    pub milli_per_1k_out: i64,
}

impl TokenPricing {
    pub fn from_settings(settings: &llmc_config::BackendSettings) -> Self {
        Self {
            milli_per_1k_in: super::cost::usd_to_milli(settings.usd_per_1k_tokens_in),
            milli_per_1k_out: super::cost::usd_to_milli(settings.usd_per_1k_tokens_out),
        }
    }

    pub fn cost_milli(&self, tokens_in: u64, tokens_out: u64) -> i64 {
        (tokens_in as i64 * self.milli_per_1k_in + tokens_out as i64 * self.milli_per_1k_out)
            / 1000
    }
}

/// A [`GenerateBackend`] wrapped with rate limiting, backoff, circuit
/// breaking, and cost ceilings. Implements the same trait, so cascades
/// hold only reliable backends.
pub struct ReliableBackend {
    inner: Arc<dyn GenerateBackend>,
    limiter: CapacityLimiter,
    breaker: CircuitBreaker,
    cost: CostTracker,
    pricing: TokenPricing,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ReliableBackend {
    pub fn new(
        inner: Arc<dyn GenerateBackend>,
        limiter: CapacityLimiter,
        breaker: CircuitBreaker,
        cost: CostTracker,
        pricing: TokenPricing,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            limiter,
            breaker,
            cost,
            pricing,
            retry,
            cancel,
        }
    }

    /// Assemble the full stack from a configured cascade member.
    pub fn from_settings(
        inner: Arc<dyn GenerateBackend>,
        settings: &llmc_config::BackendSettings,
        cancel: CancellationToken,
    ) -> Self {
        let name = inner.id().to_string();
        Self::new(
            inner,
            CapacityLimiter::new(settings.rpm, settings.tpm),
            CircuitBreaker::new(name.clone()),
            CostTracker::new(name, settings.daily_usd_cap, settings.monthly_usd_cap),
            TokenPricing::from_settings(settings),
            RetryPolicy {
                max_attempts: settings.retry_attempts.max(1),
                ..RetryPolicy::default()
            },
            cancel,
        )
    }

    /// Replace the retry policy (tests shrink the delays).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cost(&self) -> &CostTracker {
        &self.cost
    }
}

#[async_trait]
impl GenerateBackend for ReliableBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<GenerateOutput> {
        let estimated_tokens = estimate_tokens(prompt) + params.max_tokens as u64;
        let estimated_cost =
            self.pricing.cost_milli(estimate_tokens(prompt), params.max_tokens as u64);

        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }

            // Circuit and budget both reject before anything is issued.
            self.breaker.check()?;
            self.cost.check(estimated_cost)?;
            self.limiter.acquire(estimated_tokens, &self.cancel).await?;

            let call = self.inner.generate(prompt, params);
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(BackendError::Cancelled),
                result = call => result,
            };

            match result {
                Ok(output) => {
                    self.breaker.record_success();
                    let actual = self.pricing.cost_milli(output.tokens_in, output.tokens_out);
                    self.cost.record(actual);
                    return Ok(output);
                }
                Err(BackendError::Cancelled) => return Err(BackendError::Cancelled),
                Err(error) => {
                    attempt += 1;
                    if matches!(error, BackendError::QuotaExhausted(_)) {
                        // Quota opens the circuit and escalates at once.
                        self.breaker.trip();
                        return Err(error);
                    }
                    if error.trips_breaker() {
                        self.breaker.record_failure();
                    }
                    if !error.is_retryable() || attempt >= self.retry.max_attempts {
                        warn!(
                            backend = %self.inner.id(),
                            attempts = attempt,
                            reason = error.reason(),
                            "generate failed"
                        );
                        return Err(error);
                    }

                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        backend = %self.inner.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = error.reason(),
                        "retrying after backoff"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(BackendError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn test_pricing() {
        let pricing = TokenPricing {
            milli_per_1k_in: 500,  // $0.50 / 1k
            milli_per_1k_out: 1500, // $1.50 / 1k
        };
        // 2000 in + 1000 out = 2*500 + 1*1500 = 2500 milli = $2.50
        assert_eq!(pricing.cost_milli(2000, 1000), 2500);
        assert_eq!(TokenPricing::default().cost_milli(1_000_000, 1_000_000), 0);
    }
}

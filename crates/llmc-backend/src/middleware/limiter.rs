//! Token-bucket capacity limiter: requests-per-minute plus
//! tokens-per-minute, both cooperative and cancellable.

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, Result};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-backend admission control. A generate call waits here until both
/// a request slot and enough token capacity are available, or the
/// request is cancelled.
pub struct CapacityLimiter {
    requests: DirectLimiter,
    tokens: DirectLimiter,
    tpm: u32,
}

impl CapacityLimiter {
    pub fn new(rpm: u32, tpm: u32) -> Self {
        let rpm = NonZeroU32::new(rpm.max(1)).expect("max(1) is non-zero");
        let tpm_nz = NonZeroU32::new(tpm.max(1)).expect("max(1) is non-zero");
        Self {
            requests: RateLimiter::direct(Quota::per_minute(rpm)),
            tokens: RateLimiter::direct(Quota::per_minute(tpm_nz)),
            tpm: tpm.max(1),
        }
    }

    /// Wait until capacity is available. Requests larger than the whole
    /// token window are clamped so they admit eventually rather than
    /// never.
    pub async fn acquire(&self, estimated_tokens: u64, cancel: &CancellationToken) -> Result<()> {
        let clamped = estimated_tokens.min(self.tpm as u64).max(1) as u32;
        let n = NonZeroU32::new(clamped).expect("clamped to >= 1");

        let wait = async {
            self.requests.until_ready().await;
            self.tokens
                .until_n_ready(n)
                .await
                .map_err(|e| BackendError::Transport(format!("token bucket misconfigured: {e}")))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = wait => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_requests_admit_immediately() {
        let limiter = CapacityLimiter::new(60, 60_000);
        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_millis(100), limiter.acquire(500, &cancel))
            .await
            .expect("should not block")
            .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_is_clamped() {
        let limiter = CapacityLimiter::new(60, 100);
        let cancel = CancellationToken::new();
        // Larger than the whole window: clamps instead of hanging forever.
        tokio::time::timeout(Duration::from_secs(2), limiter.acquire(10_000, &cancel))
            .await
            .expect("clamped acquire must complete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_aborts_wait() {
        // One request per minute: the second acquire must block.
        let limiter = CapacityLimiter::new(1, 1_000_000);
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();

        let pending = limiter.acquire(1, &cancel);
        cancel.cancel();
        let err = pending.await.unwrap_err();
        assert!(matches!(err, BackendError::Cancelled));
    }
}

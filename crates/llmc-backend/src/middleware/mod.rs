//! Reliability middleware: rate limiting, backoff, circuit breaking,
//! and cost ceilings, composed as a decorator over any backend.
//!
//! Middleware state is owned by whoever owns the backend: per repo by
//! default, process-wide only when provider quotas are shared across
//! repos. Either way it is injected explicitly, never reached through
//! ambient state.

mod breaker;
mod cost;
mod limiter;
mod reliable;

pub use breaker::{CircuitBreaker, FAILURE_THRESHOLD, OPEN_DURATION};
pub use cost::{milli_to_usd, usd_to_milli, CostTracker};
pub use limiter::CapacityLimiter;
pub use reliable::{ReliableBackend, RetryPolicy, TokenPricing};

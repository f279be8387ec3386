//! llmc-backend: uniform LLM backend adapters plus reliability
//! middleware.
//!
//! Adapters implement one capability set, [`GenerateBackend`], over
//! local and remote endpoints. [`middleware::ReliableBackend`] wraps any
//! adapter with a token-bucket rate limiter, exponential backoff with
//! jitter, a circuit breaker, and daily/monthly cost ceilings. The
//! enrichment pipeline composes wrapped backends into an ordered tier
//! cascade.

pub mod error;
pub mod local;
pub mod middleware;
pub mod openai;
pub mod parse;
pub mod traits;
pub mod types;

pub use error::{BackendError, Result};
pub use local::LocalHttpBackend;
pub use middleware::{
    CapacityLimiter, CircuitBreaker, CostTracker, ReliableBackend, RetryPolicy, TokenPricing,
};
pub use openai::OpenAiBackend;
pub use parse::{extract_json, strip_code_fences};
pub use traits::GenerateBackend;
pub use types::{estimate_tokens, GenerateOutput, GenerateParams};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Build a wrapped backend from one configured cascade member.
///
/// `kind` selects the adapter; the reliability stack always applies.
pub fn build_backend(
    name: &str,
    settings: &llmc_config::BackendSettings,
    cancel: CancellationToken,
) -> Result<Arc<ReliableBackend>> {
    let inner: Arc<dyn GenerateBackend> = match settings.kind.as_str() {
        "openai" => Arc::new(OpenAiBackend::from_settings(name, settings)?),
        _ => Arc::new(LocalHttpBackend::from_settings(name, settings)?),
    };
    Ok(Arc::new(ReliableBackend::from_settings(
        inner, settings, cancel,
    )))
}

//! Embedding providers.
//!
//! A profile names a `(provider, model, dim)` triple; this module turns
//! profiles into live providers. Two kinds ship: an OpenAI-compatible
//! HTTP provider and a local model-host provider. Both batch their
//! inputs and enforce the configured dimension.

mod local;
mod openai;

pub use local::LocalEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, SearchError};

/// An embedding endpoint.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identity recorded on embedding rows; changing it
    /// invalidates the profile's stored vectors.
    fn provider_id(&self) -> &str;

    /// Expected vector dimension.
    fn dim(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build a provider from a named profile.
pub fn build_provider(
    profile_name: &str,
    profile: &llmc_config::ProfileConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match profile.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbeddingProvider::from_profile(profile)?)),
        "local" => Ok(Arc::new(LocalEmbeddingProvider::from_profile(profile)?)),
        other => Err(SearchError::ProviderUnavailable(format!(
            "profile '{profile_name}' names unknown provider '{other}'"
        ))),
    }
}

/// Check a provider response against the profile dimension.
pub(crate) fn check_dims(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    for vector in vectors {
        if vector.len() != expected {
            return Err(SearchError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}

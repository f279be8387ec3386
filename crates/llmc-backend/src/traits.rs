//! Backend capability set.
//!
//! Every adapter, local or remote, implements the same two-operation
//! contract. The enrichment pipeline holds an ordered list of
//! [`GenerateBackend`]s as a cascade; new providers plug in by
//! implementing this trait, with no pipeline changes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GenerateOutput, GenerateParams};

/// An LLM endpoint able to complete prompts.
#[async_trait]
pub trait GenerateBackend: Send + Sync {
    /// Stable identifier (the cascade tier name).
    fn id(&self) -> &str;

    /// Model identifier recorded on enrichments this backend produces.
    fn model_id(&self) -> &str;

    /// Complete a prompt.
    ///
    /// # Errors
    ///
    /// Returns a categorized [`crate::BackendError`]; see the error
    /// taxonomy for retry/escalation semantics.
    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<GenerateOutput>;

    /// Release any held resources. Idempotent.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    // The cascade stores backends as trait objects.
    fn _assert_object_safe(_: &dyn GenerateBackend) {}
}

//! Shared types for generate calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters for one generate call.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    /// Completion token budget.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Optional system prompt.
    pub system: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.1,
            system: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GenerateParams {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Result of a successful generate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOutput {
    /// Raw completion text.
    pub text: String,

    /// Prompt tokens, as reported by the provider (estimated when the
    /// provider omits usage).
    pub tokens_in: u64,

    /// Completion tokens.
    pub tokens_out: u64,

    /// Wall-clock latency of the HTTP call.
    pub latency_ms: u64,
}

/// Rough token estimate for budgeting and rate limiting before the
/// provider reports real usage. Four bytes per token is the usual
/// approximation for code-heavy text.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerateParams::default();
        assert_eq!(params.timeout, Duration::from_secs(30));
        assert!(params.max_tokens > 0);
    }

    #[test]
    fn test_estimate_tokens_never_zero() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}

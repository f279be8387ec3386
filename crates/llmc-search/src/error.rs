//! Error types for llmc-search.

use thiserror::Error;

/// Errors that can occur in query and retrieval operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Store or extraction error from the core crate
    #[error(transparent)]
    Core(#[from] llmc_core::CoreError),

    /// Embedding provider unavailable
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Embedding dimension mismatch
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No profile configured under the requested name
    #[error("unknown embedding profile: {0}")]
    UnknownProfile(String),

    /// The index is stale and the caller asked for fresh results only
    #[error("index is stale; run sync before querying")]
    StaleIndex,

    /// Symbol not present in the graph
    #[error("symbol not found in graph: {0}")]
    UnknownSymbol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    /// Stable error code for structured payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::Core(_) => "store_error",
            SearchError::ProviderUnavailable(_) => "provider_unavailable",
            SearchError::DimensionMismatch { .. } => "dimension_mismatch",
            SearchError::UnknownProfile(_) => "unknown_profile",
            SearchError::StaleIndex => "stale_index",
            SearchError::UnknownSymbol(_) => "unknown_symbol",
            SearchError::Serialization(_) => "serialization_error",
            SearchError::Io(_) => "io_error",
        }
    }

    /// Operator hint attached to structured error payloads.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            SearchError::StaleIndex => Some("run `llmc sync` or start the daemon"),
            SearchError::ProviderUnavailable(_) => {
                Some("check the embedding endpoint in .llmc/config.toml")
            }
            SearchError::UnknownSymbol(_) => Some("run `llmc sync` to refresh the graph"),
            _ => None,
        }
    }
}

/// Result type for llmc-search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SearchError::StaleIndex.code(), "stale_index");
        assert_eq!(
            SearchError::UnknownSymbol("x".to_string()).code(),
            "unknown_symbol"
        );
    }
}

//! Pipeline error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Store, extraction, or sync error
    #[error(transparent)]
    Core(#[from] llmc_core::CoreError),

    /// Backend call error
    #[error(transparent)]
    Backend(#[from] llmc_backend::BackendError),

    /// Embedding provider or routing error
    #[error(transparent)]
    Search(#[from] llmc_search::SearchError),

    /// Enrichment payload failed validation
    #[error("enrichment validation failed: {0}")]
    Validation(String),

    /// Another daemon holds the repo lock
    #[error("repo is locked by another daemon: {path}")]
    LockHeld { path: PathBuf },

    /// The cascade has no usable tier for a span
    #[error("cascade exhausted for span {span_hash}: {last_reason}")]
    CascadeExhausted {
        span_hash: String,
        last_reason: String,
    },

    /// Cooperative cancellation; a successful abort
    #[error("cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True when the daemon should mark the repo `error` and stop.
    pub fn is_fatal_for_repo(&self) -> bool {
        matches!(
            self,
            PipelineError::Core(
                llmc_core::CoreError::StoreCorrupt(_) | llmc_core::CoreError::MigrationFailed { .. }
            )
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

//! Core error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in llmc-core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// File extension is not handled by any extractor
    #[error("unsupported language for '{path}'")]
    UnsupportedLanguage { path: PathBuf },

    /// Source could not be parsed into an AST
    #[error("parse error in '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    /// Store is locked by another writer
    #[error("index store busy: {0}")]
    StoreBusy(String),

    /// Store file is damaged or has an unexpected layout
    #[error("index store corrupt: {0}")]
    StoreCorrupt(String),

    /// A schema migration failed; the store was left untouched
    #[error("schema migration to version {version} failed: {message}")]
    MigrationFailed { version: i64, message: String },

    /// A relation referenced an entity id that does not exist
    #[error("unknown relation endpoint '{id}'")]
    UnknownEndpoint { id: String },

    /// Underlying SQLite error
    #[error("store error: {0}")]
    Store(rusqlite::Error),

    /// Git operation failed
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message) => match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    CoreError::StoreBusy(message.clone().unwrap_or_else(|| code.to_string()))
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    CoreError::StoreCorrupt(message.clone().unwrap_or_else(|| code.to_string()))
                }
                _ => CoreError::Store(err),
            },
            _ => CoreError::Store(err),
        }
    }
}

impl CoreError {
    /// Create an UnsupportedLanguage error.
    pub fn unsupported(path: impl Into<PathBuf>) -> Self {
        Self::UnsupportedLanguage { path: path.into() }
    }

    /// Create a ParseError.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ParseError {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for llmc-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::unsupported("a.bin");
        assert!(err.to_string().contains("a.bin"));

        let err = CoreError::parse("a.py", "invalid syntax");
        assert!(err.to_string().contains("invalid syntax"));
    }
}

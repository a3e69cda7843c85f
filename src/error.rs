//! Error types for the semantic similarity engine
//!
//! This module provides structured error types using thiserror. Every failure
//! the engine can produce is surfaced as a typed variant; nothing is folded
//! into an empty result or a default value.

use crate::types::{Collection, OwnerId};
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Vector length disagrees with the dimension established for the collection
    #[error(
        "Dimension mismatch in '{collection}': expected {expected}, got {actual}. All embeddings in a collection must come from the same model"
    )]
    DimensionMismatch {
        collection: Collection,
        expected: usize,
        actual: usize,
    },

    /// The owner has no stored embedding
    #[error("No embedding stored for {collection} {owner_id}")]
    NotFound {
        collection: Collection,
        owner_id: OwnerId,
    },

    /// The embedding provider failed or timed out
    #[error("Embedding provider unavailable: {reason}")]
    EmbeddingUnavailable { reason: String },

    /// Caller supplied an out-of-range or malformed argument
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// Persisted vector data could not be read or written
    #[error("Vector storage failure at '{path}': {reason}")]
    Storage { path: PathBuf, reason: String },

    /// The record store collaborator failed
    #[error("Record store failure: {reason}")]
    RecordStore { reason: String },

    /// A long-running operation was abandoned by its caller
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// A worker failed for reasons unrelated to the caller's input
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    /// Mutex poisoned error
    #[error("Internal mutex was poisoned, likely due to panic in another thread")]
    MutexPoisoned,
}

impl EngineError {
    /// Shorthand for [`EngineError::InvalidArgument`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Shorthand for [`EngineError::EmbeddingUnavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable {
            reason: reason.into(),
        }
    }

    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::EmbeddingUnavailable { .. } => "EMBEDDING_UNAVAILABLE",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::RecordStore { .. } => "RECORD_STORE_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::MutexPoisoned => "MUTEX_POISONED",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Check that the configured embedding model has not changed since the index was built",
                "Run 'civicsim index --force' to re-embed the collection with the current model",
            ],
            Self::NotFound { .. } => vec![
                "Make sure the record exists and has been indexed with 'civicsim index'",
            ],
            Self::EmbeddingUnavailable { .. } => vec![
                "The embedding model may still be downloading; retry once it is cached",
                "Raise [embedding] timeout_secs if the host is slow",
            ],
            Self::Storage { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Run 'civicsim index --force' to rebuild the vector store",
            ],
            Self::Config { .. } => vec!["Run 'civicsim config' to inspect the active settings"],
            Self::MutexPoisoned => vec!["Restart the application to clear the poisoned state"],
            _ => vec![],
        }
    }
}

impl From<VectorError> for EngineError {
    fn from(err: VectorError) -> Self {
        Self::InvalidArgument {
            name: "vector",
            reason: err.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Helper trait for attaching a path to I/O failures
pub trait StorageContext<T> {
    /// Convert the error into [`EngineError::Storage`] for `path`
    fn at_path(self, path: &std::path::Path) -> EngineResult<T>;
}

impl<T, E> StorageContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn at_path(self, path: &std::path::Path) -> EngineResult<T> {
        self.map_err(|e| EngineError::Storage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        let err = EngineError::NotFound {
            collection: Collection::Issue,
            owner_id: OwnerId::new(7),
        };
        assert_eq!(err.status_code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "No embedding stored for issue 7");

        let err = EngineError::invalid("limit", "must be at least 1");
        assert_eq!(err.status_code(), "INVALID_ARGUMENT");
        assert!(err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_vector_errors_become_invalid_arguments() {
        let err: EngineError = VectorError::NonFinite { index: 2 }.into();
        assert!(matches!(
            err,
            EngineError::InvalidArgument { name: "vector", .. }
        ));
    }
}

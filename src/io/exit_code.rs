//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - the engine itself is in a bad state
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::EngineError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// Record or embedding not found, or nothing matched (code 3)
    NotFound = 3,

    /// Bad argument or vector (code 4)
    InvalidArgument = 4,

    /// Embedding provider failed or timed out (code 5)
    EmbeddingUnavailable = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Vector or record storage failure (code 7)
    StorageError = 7,

    /// Operation cancelled before completion (code 8)
    Cancelled = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Convert an `EngineError` to the appropriate exit code.
    pub fn from_error(error: &EngineError) -> Self {
        match error {
            EngineError::NotFound { .. } => ExitCode::NotFound,
            EngineError::InvalidArgument { .. } | EngineError::DimensionMismatch { .. } => {
                ExitCode::InvalidArgument
            }
            EngineError::EmbeddingUnavailable { .. } => ExitCode::EmbeddingUnavailable,
            EngineError::Config { .. } => ExitCode::ConfigError,
            EngineError::Storage { .. } | EngineError::RecordStore { .. } => {
                ExitCode::StorageError
            }
            EngineError::Cancelled { .. } => ExitCode::Cancelled,
            EngineError::Internal { .. } | EngineError::MutexPoisoned => ExitCode::BlockingError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Collection, OwnerId};
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as u8, 0);
        assert_eq!(ExitCode::NotFound as u8, 3);
        assert_eq!(ExitCode::InvalidArgument as u8, 4);
        assert_eq!(ExitCode::EmbeddingUnavailable as u8, 5);
        assert_eq!(ExitCode::ConfigError as u8, 6);
        assert_eq!(ExitCode::StorageError as u8, 7);
    }

    #[test]
    fn test_from_error() {
        let cases = [
            (
                EngineError::NotFound {
                    collection: Collection::Issue,
                    owner_id: OwnerId::new(1),
                },
                ExitCode::NotFound,
            ),
            (EngineError::invalid("limit", "zero"), ExitCode::InvalidArgument),
            (EngineError::unavailable("timeout"), ExitCode::EmbeddingUnavailable),
            (
                EngineError::Config {
                    reason: "bad".into(),
                },
                ExitCode::ConfigError,
            ),
            (
                EngineError::Storage {
                    path: PathBuf::from("x"),
                    reason: "io".into(),
                },
                ExitCode::StorageError,
            ),
            (EngineError::MutexPoisoned, ExitCode::BlockingError),
            (
                EngineError::Internal {
                    reason: "worker panicked".into(),
                },
                ExitCode::BlockingError,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ExitCode::from_error(&error), expected, "{error}");
        }
    }
}

//! Archive error types

use errors::{ErrorCategory, VoltageError, VoltageErrorTrait};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Operation issued before `init` completed
    #[error("Event storage {0} is not initialized")]
    NotInitialized(String),

    /// Another structural operation is in flight
    #[error("Event storage {0} is busy")]
    Busy(String),

    #[error("Expected {expected} candidates, got {actual}")]
    CandidateCount { expected: usize, actual: usize },

    #[error("Buffer capacity must be greater than zero")]
    InvalidCapacity,

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Durable row store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for ArchiveError {
    fn from(err: sqlx::Error) -> Self {
        ArchiveError::Storage(err.to_string())
    }
}

impl VoltageErrorTrait for ArchiveError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "ARCHIVE_NOT_INITIALIZED",
            Self::Busy(_) => "ARCHIVE_BUSY",
            Self::CandidateCount { .. } => "ARCHIVE_CANDIDATE_COUNT",
            Self::InvalidCapacity => "ARCHIVE_INVALID_CAPACITY",
            Self::InvalidIdentifier(_) => "ARCHIVE_INVALID_IDENTIFIER",
            Self::Storage(_) => "ARCHIVE_STORAGE_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotInitialized(_) => ErrorCategory::Internal,
            Self::Busy(_) => ErrorCategory::ResourceBusy,
            Self::CandidateCount { .. } | Self::InvalidCapacity => ErrorCategory::Validation,
            Self::InvalidIdentifier(_) => ErrorCategory::Configuration,
            Self::Storage(_) => ErrorCategory::Database,
        }
    }
}

impl From<ArchiveError> for VoltageError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::NotInitialized(name) => VoltageError::NotInitialized(name),
            ArchiveError::Busy(name) => VoltageError::ResourceBusy(name),
            ArchiveError::CandidateCount { .. } | ArchiveError::InvalidCapacity => {
                VoltageError::Validation(err.to_string())
            },
            ArchiveError::InvalidIdentifier(_) => VoltageError::Configuration(err.to_string()),
            ArchiveError::Storage(msg) => VoltageError::Database(msg),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_retryable() {
        let err = ArchiveError::Busy("plc1.temp".into());
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "ARCHIVE_BUSY");
    }

    #[test]
    fn test_not_initialized_is_not_retryable() {
        let err = ArchiveError::NotInitialized("plc1.temp".into());
        assert!(!err.is_retryable());
        assert_eq!(err.log_level(), tracing::Level::ERROR);
        let voltage: VoltageError = err.into();
        assert_eq!(voltage.status_code(), 500);
    }
}

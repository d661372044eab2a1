//! Error handling for the acquisition service

use errors::{ErrorCategory, VoltageError, VoltageErrorTrait};
use thiserror::Error;
use voltage_archive::ArchiveError;
use voltage_codec::CodecError;

/// Result type alias for the acquisition service
pub type Result<T> = std::result::Result<T, AcqError>;

/// Transport-level failures
///
/// Raised by [`crate::transport::Transport`] implementations. Inside a tick
/// they are absorbed; direct single-item calls surface them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Device answered with a protocol exception
    #[error("Device exception: {0}")]
    Exception(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Address {0} is out of range for this transport")]
    InvalidAddress(u32),

    #[error("Function code {0} is not supported by this transport")]
    Unsupported(u8),

    #[error("Short response: expected {expected} units, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

impl VoltageErrorTrait for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "TRANSPORT_NOT_CONNECTED",
            Self::ConnectFailed { .. } => "TRANSPORT_CONNECT_FAILED",
            Self::Timeout(_) => "TRANSPORT_TIMEOUT",
            Self::Exception(_) => "TRANSPORT_EXCEPTION",
            Self::Io(_) => "TRANSPORT_IO_ERROR",
            Self::InvalidAddress(_) => "TRANSPORT_INVALID_ADDRESS",
            Self::Unsupported(_) => "TRANSPORT_UNSUPPORTED",
            Self::ShortResponse { .. } => "TRANSPORT_SHORT_RESPONSE",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotConnected | Self::ConnectFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Io(_) => ErrorCategory::Network,
            Self::Exception(_)
            | Self::InvalidAddress(_)
            | Self::Unsupported(_)
            | Self::ShortResponse { .. } => ErrorCategory::Protocol,
        }
    }
}

/// Acquisition service error type
#[derive(Error, Debug)]
pub enum AcqError {
    /// Missing or invalid configuration field
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: &'static str, id: String },

    /// Variable still referenced by a calculated element
    #[error("Variable {variable} is referenced by calculation element {element}")]
    InUse { variable: String, element: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Device {0} is not active")]
    NotActive(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AcqError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn variable_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Variable",
            id: id.into(),
        }
    }
}

impl From<figment::Error> for AcqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl VoltageErrorTrait for AcqError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "ACQSRV_CONFIG_ERROR",
            Self::NotFound { .. } => "ACQSRV_NOT_FOUND",
            Self::AlreadyExists { .. } => "ACQSRV_ALREADY_EXISTS",
            Self::InUse { .. } => "ACQSRV_IN_USE",
            Self::Validation(_) => "ACQSRV_VALIDATION_ERROR",
            Self::NotActive(_) => "ACQSRV_NOT_ACTIVE",
            Self::Codec(e) => e.error_code(),
            Self::Archive(e) => e.error_code(),
            Self::Transport(e) => e.error_code(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } | Self::InUse { .. } => ErrorCategory::Conflict,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::NotActive(_) => ErrorCategory::Connection,
            Self::Codec(e) => e.category(),
            Self::Archive(e) => e.category(),
            Self::Transport(e) => e.category(),
        }
    }
}

impl From<TransportError> for VoltageError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectFailed { endpoint, reason } => {
                VoltageError::ConnectionFailed { endpoint, reason }
            },
            TransportError::Timeout(_) => VoltageError::Timeout(err.to_string()),
            TransportError::Exception(_)
            | TransportError::InvalidAddress(_)
            | TransportError::Unsupported(_)
            | TransportError::ShortResponse { .. } => VoltageError::Protocol {
                protocol: "transport".to_string(),
                message: err.to_string(),
            },
            TransportError::NotConnected | TransportError::Io(_) => {
                VoltageError::Communication(err.to_string())
            },
        }
    }
}

impl From<AcqError> for VoltageError {
    fn from(err: AcqError) -> Self {
        match err {
            AcqError::Config(msg) => VoltageError::Configuration(msg),
            AcqError::NotFound { resource, id } => VoltageError::NotFound {
                resource: format!("{} {}", resource, id),
            },
            AcqError::AlreadyExists { .. } | AcqError::InUse { .. } => {
                VoltageError::AlreadyExists(err.to_string())
            },
            AcqError::Validation(msg) => VoltageError::Validation(msg),
            AcqError::NotActive(_) => VoltageError::Communication(err.to_string()),
            AcqError::Codec(e) => e.into(),
            AcqError::Archive(e) => e.into(),
            AcqError::Transport(e) => e.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_errors_map_to_bad_request() {
        let err: VoltageError = AcqError::config("missing field `id`").into();
        assert_eq!(err.status_code(), 400);

        let err: VoltageError = AcqError::Codec(CodecError::InvalidFunctionCode {
            code: 6,
            kind: "int32".to_string(),
            usage: "setSingleFCode",
        })
        .into();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_lookup_errors_map_to_not_found() {
        let err: VoltageError = AcqError::variable_not_found("v1").into();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        let err = TransportError::Timeout(500);
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = AcqError::Transport(TransportError::NotConnected);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_in_use_is_conflict() {
        let err = AcqError::InUse {
            variable: "v1".to_string(),
            element: "c1".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Conflict);
        let err: VoltageError = err.into();
        assert_eq!(err.status_code(), 409);
    }
}

//! Shared error surface for the acquisition gateway
//!
//! Each crate owns a domain enum (`CodecError`, `ArchiveError`,
//! `TransportError`, `AcqError`) and implements [`VoltageErrorTrait`] on it.
//! At the service boundary those enums are converted into [`VoltageError`],
//! which carries a stable code, a category and an HTTP-equivalent status.

use thiserror::Error;

/// Coarse classification used for retry decisions and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    NotFound,
    Conflict,

    // Field side
    Connection,
    Network,
    Timeout,
    Protocol,

    // Storage side
    Database,
    ResourceBusy,

    Internal,
}

/// Common capability interface for the gateway's error types
///
/// Implementors only provide `error_code` and `category`; the retry and
/// log-level answers are derived from the category.
pub trait VoltageErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable, upper-case code for logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Worth retrying on a later tick
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::ResourceBusy
        )
    }

    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Database => Level::ERROR,
            ErrorCategory::Validation | ErrorCategory::NotFound | ErrorCategory::Conflict => {
                Level::INFO
            },
            _ => Level::WARN,
        }
    }
}

/// Boundary error every domain enum collapses into
#[derive(Debug, Error)]
pub enum VoltageError {
    // Construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid function code {code} for {kind}")]
    InvalidFunctionCode { code: u8, kind: String },

    #[error("Data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    // Registry
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    // Field I/O
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    // Event storage
    #[error("Database error: {0}")]
    Database(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),
}

pub type VoltageResult<T> = Result<T, VoltageError>;

impl VoltageError {
    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration(_)
            | Self::InvalidFunctionCode { .. }
            | Self::TypeMismatch { .. }
            | Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::AlreadyExists(_) => 409,
            Self::ConnectionFailed { .. } | Self::Protocol { .. } | Self::Communication(_) => 502,
            Self::ResourceBusy(_) => 503,
            Self::Timeout(_) => 504,
            Self::Database(_) | Self::NotInitialized(_) => 500,
        }
    }
}

impl VoltageErrorTrait for VoltageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidFunctionCode { .. } => "INVALID_FUNCTION_CODE",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::ResourceBusy(_) => "RESOURCE_BUSY",
            Self::NotInitialized(_) => "NOT_INITIALIZED",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidFunctionCode { .. } | Self::TypeMismatch { .. } | Self::Validation(_) => {
                ErrorCategory::Validation
            },
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists(_) => ErrorCategory::Conflict,
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) => ErrorCategory::Network,
            Self::Database(_) => ErrorCategory::Database,
            Self::ResourceBusy(_) => ErrorCategory::ResourceBusy,
            Self::NotInitialized(_) => ErrorCategory::Internal,
        }
    }
}

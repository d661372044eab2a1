//! Codec error types

use errors::{ErrorCategory, VoltageError, VoltageErrorTrait};
use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while building or converting typed values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Function code not accepted by the variable kind
    #[error("Function code {code} is not valid for {kind} ({usage})")]
    InvalidFunctionCode {
        code: u8,
        kind: String,
        usage: &'static str,
    },

    /// Word or byte buffer has the wrong size for the kind
    #[error("Length mismatch for {kind}: expected {expected}, got {actual}")]
    LengthMismatch {
        kind: String,
        expected: usize,
        actual: usize,
    },

    /// Value variant does not belong to the kind
    #[error("Value type mismatch: expected {expected}, got {actual}")]
    ValueTypeMismatch { expected: String, actual: String },

    /// Unknown `type` discriminator
    #[error("Unknown variable type: {0}")]
    UnknownType(String),

    /// Byte array declared with zero length
    #[error("Variable length must be greater than zero")]
    ZeroLength,

    #[error("Bit index out of range: byte {byte_index}, bit {bit_index}")]
    BitIndexOutOfRange { byte_index: usize, bit_index: u8 },
}

impl VoltageErrorTrait for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFunctionCode { .. } => "CODEC_INVALID_FUNCTION_CODE",
            Self::LengthMismatch { .. } => "CODEC_LENGTH_MISMATCH",
            Self::ValueTypeMismatch { .. } => "CODEC_VALUE_TYPE_MISMATCH",
            Self::UnknownType(_) => "CODEC_UNKNOWN_TYPE",
            Self::ZeroLength => "CODEC_ZERO_LENGTH",
            Self::BitIndexOutOfRange { .. } => "CODEC_BIT_OUT_OF_RANGE",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownType(_) | Self::ZeroLength => ErrorCategory::Configuration,
            Self::InvalidFunctionCode { .. }
            | Self::ValueTypeMismatch { .. }
            | Self::BitIndexOutOfRange { .. } => ErrorCategory::Validation,
            Self::LengthMismatch { .. } => ErrorCategory::Protocol,
        }
    }
}

impl From<CodecError> for VoltageError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidFunctionCode { code, kind, .. } => {
                VoltageError::InvalidFunctionCode { code, kind }
            },
            CodecError::ValueTypeMismatch { expected, actual } => {
                VoltageError::TypeMismatch { expected, actual }
            },
            CodecError::LengthMismatch { .. } => VoltageError::Protocol {
                protocol: "codec".to_string(),
                message: err.to_string(),
            },
            CodecError::UnknownType(_) | CodecError::ZeroLength => {
                VoltageError::Configuration(err.to_string())
            },
            CodecError::BitIndexOutOfRange { .. } => VoltageError::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_function_code_maps_to_bad_request() {
        let err = CodecError::InvalidFunctionCode {
            code: 6,
            kind: "float32".to_string(),
            usage: "setSingle",
        };
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(!err.is_retryable());

        let voltage: VoltageError = err.into();
        assert_eq!(voltage.status_code(), 400);
    }

    #[test]
    fn test_unknown_type_is_configuration() {
        let err = CodecError::UnknownType("double".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("double"));
    }
}

//! Decoded engineering values

use serde::Serialize;
use std::fmt;

/// A typed value held by a variable
///
/// Serialized untagged so snapshots carry the plain value
/// (`true`, `42`, `3.5`, `[1, 2]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Float32(f32),
    Bytes(Vec<u8>),
}

impl Value {
    /// Numeric view used by calculated elements and the archive.
    /// Byte arrays have no numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Variant name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Int16(_) => "int16",
            Self::UInt16(_) => "uInt16",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uInt32",
            Self::Float32(_) => "float32",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{}", v),
            Self::Bytes(bytes) => write!(f, "{:02X?}", bytes),
        }
    }
}

//! Variable kinds and word conversion

use crate::error::{CodecError, Result};
use crate::value::Value;
use std::fmt;

/// Closed set of variable variants
///
/// Fixed-width kinds occupy one or two 16-bit words. Standard 32-bit kinds
/// carry the high word first; swapped kinds carry the low word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Boolean,
    Int16,
    UInt16,
    Int32,
    UInt32,
    SwappedInt32,
    SwappedUInt32,
    Float32,
    SwappedFloat32,
    /// Raw bytes, `length` words wide (2 × length bytes)
    ByteArray { length: u16 },
}

impl VariableKind {
    /// Build a kind from the payload's `type` discriminator.
    ///
    /// `length` is only consulted for byte arrays, where it is required and
    /// must be non-zero.
    pub fn from_type(type_name: &str, length: Option<u16>) -> Result<Self> {
        let kind = match type_name {
            "boolean" | "bool" => Self::Boolean,
            "int16" => Self::Int16,
            "uInt16" | "uint16" => Self::UInt16,
            "int32" => Self::Int32,
            "uInt32" | "uint32" => Self::UInt32,
            "swappedInt32" => Self::SwappedInt32,
            "swappedUInt32" | "swappedUint32" => Self::SwappedUInt32,
            "float32" | "float" => Self::Float32,
            "swappedFloat32" | "swappedFloat" => Self::SwappedFloat32,
            "byteArray" => match length {
                Some(0) | None => return Err(CodecError::ZeroLength),
                Some(length) => Self::ByteArray { length },
            },
            other => return Err(CodecError::UnknownType(other.to_string())),
        };
        Ok(kind)
    }

    /// Discriminator string, inverse of [`VariableKind::from_type`]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int16 => "int16",
            Self::UInt16 => "uInt16",
            Self::Int32 => "int32",
            Self::UInt32 => "uInt32",
            Self::SwappedInt32 => "swappedInt32",
            Self::SwappedUInt32 => "swappedUInt32",
            Self::Float32 => "float32",
            Self::SwappedFloat32 => "swappedFloat32",
            Self::ByteArray { .. } => "byteArray",
        }
    }

    /// Width in 16-bit words
    pub fn word_len(&self) -> u16 {
        match self {
            Self::Boolean | Self::Int16 | Self::UInt16 => 1,
            Self::Int32
            | Self::UInt32
            | Self::SwappedInt32
            | Self::SwappedUInt32
            | Self::Float32
            | Self::SwappedFloat32 => 2,
            Self::ByteArray { length } => *length,
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean)
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::ByteArray { .. })
    }

    /// Zero value of the kind
    pub fn default_value(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Int16 => Value::Int16(0),
            Self::UInt16 => Value::UInt16(0),
            Self::Int32 | Self::SwappedInt32 => Value::Int32(0),
            Self::UInt32 | Self::SwappedUInt32 => Value::UInt32(0),
            Self::Float32 | Self::SwappedFloat32 => Value::Float32(0.0),
            Self::ByteArray { length } => Value::Bytes(vec![0; usize::from(*length) * 2]),
        }
    }

    /// Whether `value` has the variant (and for byte arrays, the size) of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Boolean, Value::Boolean(_))
            | (Self::Int16, Value::Int16(_))
            | (Self::UInt16, Value::UInt16(_))
            | (Self::Int32 | Self::SwappedInt32, Value::Int32(_))
            | (Self::UInt32 | Self::SwappedUInt32, Value::UInt32(_))
            | (Self::Float32 | Self::SwappedFloat32, Value::Float32(_)) => true,
            (Self::ByteArray { length }, Value::Bytes(bytes)) => {
                bytes.len() == usize::from(*length) * 2
            },
            _ => false,
        }
    }

    /// Decode a word buffer of exactly [`VariableKind::word_len`] words
    pub fn decode(&self, words: &[u16]) -> Result<Value> {
        let expected = usize::from(self.word_len());
        if words.len() != expected {
            return Err(self.length_mismatch(expected, words.len()));
        }

        let value = match self {
            Self::Boolean => Value::Boolean(words[0] != 0),
            Self::Int16 => Value::Int16(words[0] as i16),
            Self::UInt16 => Value::UInt16(words[0]),
            Self::Int32 => Value::Int32(join_words(words[0], words[1]) as i32),
            Self::UInt32 => Value::UInt32(join_words(words[0], words[1])),
            Self::SwappedInt32 => Value::Int32(join_words(words[1], words[0]) as i32),
            Self::SwappedUInt32 => Value::UInt32(join_words(words[1], words[0])),
            Self::Float32 => Value::Float32(f32::from_bits(join_words(words[0], words[1]))),
            Self::SwappedFloat32 => {
                Value::Float32(f32::from_bits(join_words(words[1], words[0])))
            },
            Self::ByteArray { .. } => {
                let mut bytes = Vec::with_capacity(words.len() * 2);
                for word in words {
                    bytes.push((*word & 0x00FF) as u8);
                    bytes.push((*word >> 8) as u8);
                }
                Value::Bytes(bytes)
            },
        };
        Ok(value)
    }

    /// Encode a value into [`VariableKind::word_len`] words
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>> {
        let words = match (self, value) {
            (Self::Boolean, Value::Boolean(b)) => vec![u16::from(*b)],
            (Self::Int16, Value::Int16(v)) => vec![*v as u16],
            (Self::UInt16, Value::UInt16(v)) => vec![*v],
            (Self::Int32, Value::Int32(v)) => split_words(*v as u32).to_vec(),
            (Self::UInt32, Value::UInt32(v)) => split_words(*v).to_vec(),
            (Self::SwappedInt32, Value::Int32(v)) => swapped(split_words(*v as u32)),
            (Self::SwappedUInt32, Value::UInt32(v)) => swapped(split_words(*v)),
            (Self::Float32, Value::Float32(v)) => split_words(v.to_bits()).to_vec(),
            (Self::SwappedFloat32, Value::Float32(v)) => swapped(split_words(v.to_bits())),
            (Self::ByteArray { length }, Value::Bytes(bytes)) => {
                let expected = usize::from(*length) * 2;
                if bytes.len() != expected {
                    return Err(self.length_mismatch(expected, bytes.len()));
                }
                bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from(pair[0]) | (u16::from(pair[1]) << 8))
                    .collect()
            },
            _ => {
                return Err(CodecError::ValueTypeMismatch {
                    expected: self.type_name().to_string(),
                    actual: value.type_name().to_string(),
                })
            },
        };
        Ok(words)
    }

    /// Convert a JSON payload value into a typed value of this kind.
    ///
    /// Byte arrays are returned at whatever length the payload has; callers
    /// check the size with [`VariableKind::accepts`].
    pub fn value_from_json(&self, json: &serde_json::Value) -> Result<Value> {
        let mismatch = || CodecError::ValueTypeMismatch {
            expected: self.type_name().to_string(),
            actual: json.to_string(),
        };

        let value = match self {
            Self::Boolean => match json {
                serde_json::Value::Bool(b) => Value::Boolean(*b),
                serde_json::Value::Number(n) => {
                    Value::Boolean(n.as_f64().ok_or_else(mismatch)? != 0.0)
                },
                _ => return Err(mismatch()),
            },
            Self::Int16 => Value::Int16(
                json.as_i64()
                    .and_then(|v| i16::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            Self::UInt16 => Value::UInt16(
                json.as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            Self::Int32 | Self::SwappedInt32 => Value::Int32(
                json.as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            Self::UInt32 | Self::SwappedUInt32 => Value::UInt32(
                json.as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            Self::Float32 | Self::SwappedFloat32 => {
                Value::Float32(json.as_f64().ok_or_else(mismatch)? as f32)
            },
            Self::ByteArray { .. } => {
                let items = json.as_array().ok_or_else(mismatch)?;
                let bytes = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(mismatch)?;
                Value::Bytes(bytes)
            },
        };
        Ok(value)
    }

    fn length_mismatch(&self, expected: usize, actual: usize) -> CodecError {
        CodecError::LengthMismatch {
            kind: self.type_name().to_string(),
            expected,
            actual,
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByteArray { length } => write!(f, "byteArray[{}]", length),
            other => f.write_str(other.type_name()),
        }
    }
}

#[inline]
fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

#[inline]
fn split_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

#[inline]
fn swapped(words: [u16; 2]) -> Vec<u16> {
    vec![words[1], words[0]]
}

/// Pack a byte-addressed buffer into big-endian words (odd tail padded with 0)
pub fn bytes_to_words_be(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|chunk| {
            let high = u16::from(chunk[0]) << 8;
            let low = chunk.get(1).copied().map(u16::from).unwrap_or(0);
            high | low
        })
        .collect()
}

/// Unpack words into a big-endian byte buffer
pub fn words_to_bytes_be(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FIXED_KINDS: [VariableKind; 9] = [
        VariableKind::Boolean,
        VariableKind::Int16,
        VariableKind::UInt16,
        VariableKind::Int32,
        VariableKind::UInt32,
        VariableKind::SwappedInt32,
        VariableKind::SwappedUInt32,
        VariableKind::Float32,
        VariableKind::SwappedFloat32,
    ];

    // ---------- construction ----------

    #[test]
    fn test_from_type_roundtrips_name() {
        for kind in FIXED_KINDS {
            assert_eq!(VariableKind::from_type(kind.type_name(), None).unwrap(), kind);
        }
        assert_eq!(
            VariableKind::from_type("byteArray", Some(3)).unwrap(),
            VariableKind::ByteArray { length: 3 }
        );
    }

    #[test]
    fn test_from_type_rejects_unknown_and_zero_length() {
        assert_eq!(
            VariableKind::from_type("double", None),
            Err(CodecError::UnknownType("double".to_string()))
        );
        assert_eq!(
            VariableKind::from_type("byteArray", Some(0)),
            Err(CodecError::ZeroLength)
        );
        assert_eq!(
            VariableKind::from_type("byteArray", None),
            Err(CodecError::ZeroLength)
        );
    }

    // ---------- fixed-width conversion ----------

    #[test]
    fn test_int32_high_word_first() {
        let kind = VariableKind::Int32;
        assert_eq!(kind.encode(&Value::Int32(0x0001_0002)).unwrap(), vec![0x0001, 0x0002]);
        assert_eq!(kind.decode(&[0xFFFF, 0xFFFE]).unwrap(), Value::Int32(-2));
    }

    #[test]
    fn test_swapped_variants_reverse_words() {
        assert_eq!(
            VariableKind::SwappedUInt32.encode(&Value::UInt32(0x1234_5678)).unwrap(),
            vec![0x5678, 0x1234]
        );
        assert_eq!(
            VariableKind::SwappedInt32.decode(&[0xFFFE, 0xFFFF]).unwrap(),
            Value::Int32(-2)
        );

        // 1.0f32 = 0x3F80_0000
        assert_eq!(
            VariableKind::Float32.encode(&Value::Float32(1.0)).unwrap(),
            vec![0x3F80, 0x0000]
        );
        assert_eq!(
            VariableKind::SwappedFloat32.encode(&Value::Float32(1.0)).unwrap(),
            vec![0x0000, 0x3F80]
        );
        assert_eq!(
            VariableKind::SwappedFloat32.decode(&[0x0000, 0x3F80]).unwrap(),
            Value::Float32(1.0)
        );
    }

    #[test]
    fn test_boolean_nonzero_is_true() {
        assert_eq!(VariableKind::Boolean.decode(&[0]).unwrap(), Value::Boolean(false));
        assert_eq!(VariableKind::Boolean.decode(&[1]).unwrap(), Value::Boolean(true));
        assert_eq!(VariableKind::Boolean.decode(&[0xFF00]).unwrap(), Value::Boolean(true));
        assert_eq!(VariableKind::Boolean.encode(&Value::Boolean(true)).unwrap(), vec![1]);
    }

    #[test]
    fn test_int16_twos_complement() {
        assert_eq!(VariableKind::Int16.decode(&[0x8000]).unwrap(), Value::Int16(i16::MIN));
        assert_eq!(VariableKind::Int16.encode(&Value::Int16(-1)).unwrap(), vec![0xFFFF]);
    }

    #[test]
    fn test_decode_rejects_wrong_word_count() {
        let err = VariableKind::Float32.decode(&[1]).unwrap_err();
        assert_eq!(
            err,
            CodecError::LengthMismatch {
                kind: "float32".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_encode_rejects_wrong_variant() {
        let err = VariableKind::UInt16.encode(&Value::Float32(1.5)).unwrap_err();
        assert!(matches!(err, CodecError::ValueTypeMismatch { .. }));
    }

    // ---------- byte arrays ----------

    #[test]
    fn test_byte_array_low_byte_first() {
        let kind = VariableKind::ByteArray { length: 2 };
        assert_eq!(
            kind.decode(&[0x1234, 0xABCD]).unwrap(),
            Value::Bytes(vec![0x34, 0x12, 0xCD, 0xAB])
        );
        assert_eq!(
            kind.encode(&Value::Bytes(vec![0x34, 0x12, 0xCD, 0xAB])).unwrap(),
            vec![0x1234, 0xABCD]
        );
    }

    #[test]
    fn test_byte_array_size_checked() {
        let kind = VariableKind::ByteArray { length: 2 };
        assert!(kind.encode(&Value::Bytes(vec![1, 2, 3])).is_err());
        assert!(!kind.accepts(&Value::Bytes(vec![1, 2])));
        assert!(kind.accepts(&Value::Bytes(vec![1, 2, 3, 4])));
        assert_eq!(kind.default_value(), Value::Bytes(vec![0; 4]));
    }

    // ---------- round trips ----------

    #[test]
    fn test_words_roundtrip_random() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let words: Vec<u16> = vec![rng.gen(), rng.gen()];
            for kind in [
                VariableKind::Int32,
                VariableKind::UInt32,
                VariableKind::SwappedInt32,
                VariableKind::SwappedUInt32,
            ] {
                let value = kind.decode(&words).unwrap();
                assert_eq!(kind.encode(&value).unwrap(), words, "{kind}");
            }

            let array = VariableKind::ByteArray { length: 2 };
            let value = array.decode(&words).unwrap();
            assert_eq!(array.encode(&value).unwrap(), words);

            let single = [words[0]];
            for kind in [VariableKind::Int16, VariableKind::UInt16] {
                let value = kind.decode(&single).unwrap();
                assert_eq!(kind.encode(&value).unwrap(), single.to_vec());
            }
        }
    }

    #[test]
    fn test_values_roundtrip() {
        let cases = [
            (VariableKind::Boolean, Value::Boolean(true)),
            (VariableKind::Int16, Value::Int16(i16::MIN)),
            (VariableKind::UInt16, Value::UInt16(u16::MAX)),
            (VariableKind::Int32, Value::Int32(i32::MIN)),
            (VariableKind::UInt32, Value::UInt32(u32::MAX)),
            (VariableKind::SwappedInt32, Value::Int32(-123_456)),
            (VariableKind::SwappedUInt32, Value::UInt32(987_654_321)),
            (VariableKind::Float32, Value::Float32(-273.15)),
            (VariableKind::SwappedFloat32, Value::Float32(f32::MAX)),
            (
                VariableKind::ByteArray { length: 1 },
                Value::Bytes(vec![0x00, 0xFF]),
            ),
        ];

        for (kind, value) in cases {
            let words = kind.encode(&value).unwrap();
            assert_eq!(words.len(), usize::from(kind.word_len()));
            assert_eq!(kind.decode(&words).unwrap(), value, "{kind}");
        }
    }

    // ---------- payload values ----------

    #[test]
    fn test_value_from_json() {
        use serde_json::json;

        assert_eq!(
            VariableKind::Boolean.value_from_json(&json!(1)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            VariableKind::Int16.value_from_json(&json!(-7)).unwrap(),
            Value::Int16(-7)
        );
        assert!(VariableKind::Int16.value_from_json(&json!(40000)).is_err());
        assert_eq!(
            VariableKind::Float32.value_from_json(&json!(2.5)).unwrap(),
            Value::Float32(2.5)
        );
        assert_eq!(
            VariableKind::ByteArray { length: 1 }
                .value_from_json(&json!([1, 2, 3]))
                .unwrap(),
            Value::Bytes(vec![1, 2, 3])
        );
        assert!(VariableKind::ByteArray { length: 1 }
            .value_from_json(&json!([256]))
            .is_err());
    }

    #[test]
    fn test_big_endian_byte_packing() {
        assert_eq!(bytes_to_words_be(&[0x12, 0x34, 0x56]), vec![0x1234, 0x5600]);
        assert_eq!(words_to_bytes_be(&[0x1234, 0xABCD]), vec![0x12, 0x34, 0xAB, 0xCD]);
    }
}

//! Variables
//!
//! A variable binds a [`VariableKind`] to a protocol address, a poll
//! cadence and its current decoded value. Construction validates the whole
//! payload up front; nothing is checked lazily on first I/O.

use crate::archive::check_id;
use crate::error::{AcqError, Result};
use crate::request::{RequestKey, S7Address, S7Area};
use serde::{Deserialize, Serialize};
use tracing::debug;
use voltage_codec::{
    bytes_to_words_be, words_to_bytes_be, AddressUnit, CodecError, FunctionCodeSet, Protocol,
    Value, VariableKind,
};

/// Modbus addresses are 16 bit
const MODBUS_ADDRESS_SPACE: u32 = 0x1_0000;

/// Configuration payload of one variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablePayload {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub offset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u16>,
    #[serde(rename = "fCode")]
    pub f_code: u8,
    #[serde(
        rename = "getSingleFCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub get_single_f_code: Option<u8>,
    #[serde(
        rename = "setSingleFCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub set_single_f_code: Option<u8>,
    pub sample_time: u32,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_sample_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub unit: String,

    // S7 addressing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<S7Area>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_number: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit: Option<u8>,
}

impl VariablePayload {
    /// Minimal payload; the name defaults to the id
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        offset: u32,
        f_code: u8,
        sample_time: u32,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            type_name: type_name.into(),
            offset,
            length: None,
            f_code,
            get_single_f_code: None,
            set_single_f_code: None,
            sample_time,
            archived: false,
            archive_sample_time: None,
            value: None,
            unit: String::new(),
            area: None,
            db_number: None,
            bit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct S7Location {
    address: S7Address,
    bit: u8,
}

/// A configured variable and its current value
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    id: String,
    name: String,
    protocol: Protocol,
    kind: VariableKind,
    offset: u32,
    s7: Option<S7Location>,
    codes: FunctionCodeSet,
    unit: AddressUnit,
    /// First address and length in `unit`
    span: (u32, u32),
    sample_time: u32,
    archived: bool,
    archive_sample_time: u32,
    eng_unit: String,
    value: Value,
}

impl Variable {
    /// Build and validate a variable.
    ///
    /// A byte-array value whose size disagrees with the declared length is
    /// replaced by the all-zero default instead of failing.
    pub fn from_payload(protocol: Protocol, payload: &VariablePayload) -> Result<Self> {
        if payload.id.trim().is_empty() {
            return Err(AcqError::config("variable id is required"));
        }
        check_id("variable", &payload.id)?;
        if payload.name.trim().is_empty() {
            return Err(AcqError::config(format!(
                "variable {}: name is required",
                payload.id
            )));
        }
        if payload.sample_time == 0 {
            return Err(AcqError::config(format!(
                "variable {}: sampleTime must be greater than zero",
                payload.id
            )));
        }
        let archive_sample_time = payload.archive_sample_time.unwrap_or(payload.sample_time);
        if archive_sample_time == 0 {
            return Err(AcqError::config(format!(
                "variable {}: archiveSampleTime must be greater than zero",
                payload.id
            )));
        }

        let kind = VariableKind::from_type(&payload.type_name, payload.length)?;
        let codes = FunctionCodeSet::resolve(
            protocol,
            kind,
            payload.f_code,
            payload.get_single_f_code,
            payload.set_single_f_code,
        )?;

        let s7 = match protocol {
            Protocol::Modbus => None,
            Protocol::S7 => Some(s7_location(payload, kind)?),
        };
        let unit = protocol.unit(kind, codes.bulk);
        let span = address_span(payload, kind, unit, s7)?;

        let value = match &payload.value {
            None => kind.default_value(),
            Some(json) => {
                let value = kind.value_from_json(json)?;
                if kind.accepts(&value) {
                    value
                } else {
                    debug!(
                        "Variable {} value does not match declared length, reset to default",
                        payload.id
                    );
                    kind.default_value()
                }
            },
        };

        Ok(Self {
            id: payload.id.clone(),
            name: payload.name.clone(),
            protocol,
            kind,
            offset: payload.offset,
            s7,
            unit,
            span,
            codes,
            sample_time: payload.sample_time,
            archived: payload.archived,
            archive_sample_time,
            eng_unit: payload.unit.clone(),
            value,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn codes(&self) -> FunctionCodeSet {
        self.codes
    }

    pub fn sample_time(&self) -> u32 {
        self.sample_time
    }

    pub fn archived(&self) -> bool {
        self.archived
    }

    pub fn archive_sample_time(&self) -> u32 {
        self.archive_sample_time
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Stage a new value; returns whether it differs from the current one
    pub fn set_value(&mut self, value: Value) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }

    /// Request key, start and length (in address units) for `code`
    pub fn address(&self, code: u8) -> (RequestKey, u32, u32) {
        let key = RequestKey {
            function_code: code,
            area: self.s7.map(|loc| loc.address),
            unit: self.unit,
        };
        (key, self.span.0, self.span.1)
    }

    /// Decode this variable's slice of a unit buffer
    pub fn decode_units(&self, units: &[u16]) -> std::result::Result<Value, CodecError> {
        match self.unit {
            AddressUnit::Register | AddressUnit::Bit => self.kind.decode(units),
            AddressUnit::Byte => {
                let bytes: Vec<u8> = units.iter().map(|u| *u as u8).collect();
                match self.kind {
                    VariableKind::ByteArray { length } => {
                        let expected = usize::from(length) * 2;
                        if bytes.len() != expected {
                            return Err(CodecError::LengthMismatch {
                                kind: self.kind.type_name().to_string(),
                                expected,
                                actual: bytes.len(),
                            });
                        }
                        Ok(Value::Bytes(bytes))
                    },
                    _ => self.kind.decode(&bytes_to_words_be(&bytes)),
                }
            },
        }
    }

    /// Encode a value into address units
    pub fn encode_units(&self, value: &Value) -> std::result::Result<Vec<u16>, CodecError> {
        if !self.kind.accepts(value) {
            return Err(CodecError::ValueTypeMismatch {
                expected: self.kind.type_name().to_string(),
                actual: value.type_name().to_string(),
            });
        }
        match (self.unit, value) {
            (AddressUnit::Byte, Value::Bytes(bytes)) => {
                Ok(bytes.iter().map(|b| u16::from(*b)).collect())
            },
            (AddressUnit::Byte, _) => {
                let words = self.kind.encode(value)?;
                Ok(words_to_bytes_be(&words)
                    .into_iter()
                    .map(u16::from)
                    .collect())
            },
            _ => self.kind.encode(value),
        }
    }

    /// Serializable snapshot including the current value
    pub fn payload(&self) -> VariablePayload {
        VariablePayload {
            id: self.id.clone(),
            type_name: self.kind.type_name().to_string(),
            name: self.name.clone(),
            offset: self.offset,
            length: match self.kind {
                VariableKind::ByteArray { length } => Some(length),
                _ => None,
            },
            f_code: self.codes.bulk,
            get_single_f_code: Some(self.codes.get_single),
            set_single_f_code: Some(self.codes.set_single),
            sample_time: self.sample_time,
            archived: self.archived,
            archive_sample_time: Some(self.archive_sample_time),
            value: serde_json::to_value(&self.value).ok(),
            unit: self.eng_unit.clone(),
            area: self.s7.map(|loc| loc.address.area),
            db_number: self.s7.map(|loc| loc.address.db_number),
            bit: match (self.s7, self.kind) {
                (Some(loc), VariableKind::Boolean) => Some(loc.bit),
                _ => None,
            },
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

/// Start and length in address units.
///
/// Fails when the range leaves the protocol's address space, so request
/// arithmetic downstream cannot overflow.
fn address_span(
    payload: &VariablePayload,
    kind: VariableKind,
    unit: AddressUnit,
    s7: Option<S7Location>,
) -> Result<(u32, u32)> {
    let words = u32::from(kind.word_len());
    let span = match (unit, s7) {
        (AddressUnit::Bit, Some(loc)) => payload
            .offset
            .checked_mul(8)
            .and_then(|bits| bits.checked_add(u32::from(loc.bit)))
            .map(|start| (start, 1)),
        (AddressUnit::Bit, None) => Some((payload.offset, 1)),
        (AddressUnit::Register, _) => Some((payload.offset, words)),
        (AddressUnit::Byte, _) => words.checked_mul(2).map(|len| (payload.offset, len)),
    };
    let end = span.and_then(|(start, len)| start.checked_add(len));

    match (span, end) {
        (Some(span), Some(end)) if s7.is_some() || end <= MODBUS_ADDRESS_SPACE => Ok(span),
        _ => Err(AcqError::config(format!(
            "variable {}: offset {} is outside the {} address space",
            payload.id,
            payload.offset,
            if s7.is_some() { "S7" } else { "Modbus" }
        ))),
    }
}

fn s7_location(payload: &VariablePayload, kind: VariableKind) -> Result<S7Location> {
    let area = payload.area.ok_or_else(|| {
        AcqError::config(format!("variable {}: S7 area is required", payload.id))
    })?;
    let db_number = match area {
        S7Area::DataBlock => payload.db_number.ok_or_else(|| {
            AcqError::config(format!(
                "variable {}: dbNumber is required for DB area",
                payload.id
            ))
        })?,
        _ => 0,
    };
    let bit = if kind.is_boolean() {
        payload.bit.unwrap_or(0)
    } else {
        0
    };
    if bit > 7 {
        return Err(AcqError::config(format!(
            "variable {}: bit must be between 0 and 7",
            payload.id
        )));
    }
    Ok(S7Location {
        address: S7Address { area, db_number },
        bit,
    })
}

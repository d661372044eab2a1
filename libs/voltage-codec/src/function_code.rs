//! Function-code tables
//!
//! Each variable kind accepts a closed set of function codes per protocol
//! for bulk polling and for single-item get / set. Codes are resolved and
//! validated when a variable is built, never lazily on first use.

use crate::error::{CodecError, Result};
use crate::kind::VariableKind;
use serde::{Deserialize, Serialize};

/// Addressing scheme of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Modbus,
    S7,
}

/// Unit a request offset and span are counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressUnit {
    Bit,
    Register,
    Byte,
}

// Modbus function codes
pub const READ_COILS: u8 = 0x01;
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// S7 job functions
pub const S7_READ_VAR: u8 = 0x04;
pub const S7_WRITE_VAR: u8 = 0x05;

/// Accepted codes for one kind under one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionCodes {
    pub bulk: &'static [u8],
    pub get_single: &'static [u8],
    pub set_single: &'static [u8],
}

const MODBUS_BOOLEAN: FunctionCodes = FunctionCodes {
    bulk: &[READ_COILS, READ_DISCRETE_INPUTS, WRITE_MULTIPLE_COILS],
    get_single: &[READ_COILS, READ_DISCRETE_INPUTS],
    set_single: &[WRITE_SINGLE_COIL, WRITE_MULTIPLE_COILS],
};

const MODBUS_WORD: FunctionCodes = FunctionCodes {
    bulk: &[
        READ_HOLDING_REGISTERS,
        READ_INPUT_REGISTERS,
        WRITE_MULTIPLE_REGISTERS,
    ],
    get_single: &[READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS],
    set_single: &[WRITE_SINGLE_REGISTER, WRITE_MULTIPLE_REGISTERS],
};

// Multi-word values can only be written with FC16
const MODBUS_MULTI_WORD: FunctionCodes = FunctionCodes {
    bulk: &[
        READ_HOLDING_REGISTERS,
        READ_INPUT_REGISTERS,
        WRITE_MULTIPLE_REGISTERS,
    ],
    get_single: &[READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS],
    set_single: &[WRITE_MULTIPLE_REGISTERS],
};

const S7_ANY: FunctionCodes = FunctionCodes {
    bulk: &[S7_READ_VAR, S7_WRITE_VAR],
    get_single: &[S7_READ_VAR],
    set_single: &[S7_WRITE_VAR],
};

impl VariableKind {
    pub fn function_codes(&self, protocol: Protocol) -> FunctionCodes {
        match protocol {
            Protocol::S7 => S7_ANY,
            Protocol::Modbus => match self {
                Self::Boolean => MODBUS_BOOLEAN,
                Self::Int16 | Self::UInt16 => MODBUS_WORD,
                _ => MODBUS_MULTI_WORD,
            },
        }
    }
}

impl Protocol {
    /// Whether `code` transfers data to the device
    pub fn is_write(&self, code: u8) -> bool {
        match self {
            Self::Modbus => matches!(
                code,
                WRITE_SINGLE_COIL
                    | WRITE_SINGLE_REGISTER
                    | WRITE_MULTIPLE_COILS
                    | WRITE_MULTIPLE_REGISTERS
            ),
            Self::S7 => code == S7_WRITE_VAR,
        }
    }

    /// Unit of the address space a code operates on
    pub fn unit(&self, kind: VariableKind, code: u8) -> AddressUnit {
        match self {
            Self::Modbus => match code {
                READ_COILS | READ_DISCRETE_INPUTS | WRITE_SINGLE_COIL | WRITE_MULTIPLE_COILS => {
                    AddressUnit::Bit
                },
                _ => AddressUnit::Register,
            },
            Self::S7 if kind.is_boolean() => AddressUnit::Bit,
            Self::S7 => AddressUnit::Byte,
        }
    }
}

/// Resolved and validated codes of one variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCodeSet {
    #[serde(rename = "fCode")]
    pub bulk: u8,
    #[serde(rename = "getSingleFCode")]
    pub get_single: u8,
    #[serde(rename = "setSingleFCode")]
    pub set_single: u8,
}

impl FunctionCodeSet {
    /// Validate the payload codes for `kind`, filling defaults for the
    /// optional single-item codes.
    ///
    /// Defaults: get reuses the bulk code when it is a read code, set uses
    /// the narrowest write code the kind accepts.
    pub fn resolve(
        protocol: Protocol,
        kind: VariableKind,
        bulk: u8,
        get_single: Option<u8>,
        set_single: Option<u8>,
    ) -> Result<Self> {
        let codes = kind.function_codes(protocol);

        let check = |code: u8, allowed: &[u8], usage: &'static str| -> Result<u8> {
            if allowed.contains(&code) {
                Ok(code)
            } else {
                Err(CodecError::InvalidFunctionCode {
                    code,
                    kind: kind.type_name().to_string(),
                    usage,
                })
            }
        };

        let bulk = check(bulk, codes.bulk, "fCode")?;

        let get_default = if codes.get_single.contains(&bulk) {
            bulk
        } else {
            codes.get_single[0]
        };
        let get_single = check(
            get_single.unwrap_or(get_default),
            codes.get_single,
            "getSingleFCode",
        )?;
        let set_single = check(
            set_single.unwrap_or(codes.set_single[0]),
            codes.set_single,
            "setSingleFCode",
        )?;

        Ok(Self {
            bulk,
            get_single,
            set_single,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_defaults() {
        let set = FunctionCodeSet::resolve(
            Protocol::Modbus,
            VariableKind::Boolean,
            READ_DISCRETE_INPUTS,
            None,
            None,
        )
        .unwrap();
        assert_eq!(set.get_single, READ_DISCRETE_INPUTS);
        assert_eq!(set.set_single, WRITE_SINGLE_COIL);
    }

    #[test]
    fn test_write_bulk_code_falls_back_to_read_for_get() {
        let set = FunctionCodeSet::resolve(
            Protocol::Modbus,
            VariableKind::UInt16,
            WRITE_MULTIPLE_REGISTERS,
            None,
            None,
        )
        .unwrap();
        assert_eq!(set.get_single, READ_HOLDING_REGISTERS);
        assert_eq!(set.set_single, WRITE_SINGLE_REGISTER);
    }

    #[test]
    fn test_register_code_rejected_for_boolean() {
        let err = FunctionCodeSet::resolve(
            Protocol::Modbus,
            VariableKind::Boolean,
            READ_HOLDING_REGISTERS,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidFunctionCode {
                code: READ_HOLDING_REGISTERS,
                usage: "fCode",
                ..
            }
        ));
    }

    #[test]
    fn test_single_register_write_rejected_for_float() {
        let err = FunctionCodeSet::resolve(
            Protocol::Modbus,
            VariableKind::Float32,
            READ_HOLDING_REGISTERS,
            None,
            Some(WRITE_SINGLE_REGISTER),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidFunctionCode {
                usage: "setSingleFCode",
                ..
            }
        ));

        let set = FunctionCodeSet::resolve(
            Protocol::Modbus,
            VariableKind::Float32,
            READ_INPUT_REGISTERS,
            None,
            None,
        )
        .unwrap();
        assert_eq!(set.set_single, WRITE_MULTIPLE_REGISTERS);
    }

    #[test]
    fn test_s7_codes() {
        let set = FunctionCodeSet::resolve(
            Protocol::S7,
            VariableKind::ByteArray { length: 4 },
            S7_READ_VAR,
            None,
            None,
        )
        .unwrap();
        assert_eq!(set.get_single, S7_READ_VAR);
        assert_eq!(set.set_single, S7_WRITE_VAR);
        assert!(
            FunctionCodeSet::resolve(Protocol::S7, VariableKind::Int16, 0x03, None, None).is_err()
        );
    }

    #[test]
    fn test_units() {
        assert_eq!(
            Protocol::Modbus.unit(VariableKind::Boolean, READ_COILS),
            AddressUnit::Bit
        );
        assert_eq!(
            Protocol::Modbus.unit(VariableKind::Int32, READ_INPUT_REGISTERS),
            AddressUnit::Register
        );
        assert_eq!(
            Protocol::S7.unit(VariableKind::Boolean, S7_READ_VAR),
            AddressUnit::Bit
        );
        assert_eq!(
            Protocol::S7.unit(VariableKind::Float32, S7_READ_VAR),
            AddressUnit::Byte
        );
    }

    #[test]
    fn test_write_classification() {
        assert!(Protocol::Modbus.is_write(WRITE_MULTIPLE_COILS));
        assert!(!Protocol::Modbus.is_write(READ_COILS));
        assert!(Protocol::S7.is_write(S7_WRITE_VAR));
    }
}

//! Voltage Codec - Variable Type System
//!
//! Pure, stateless conversion between raw protocol words and typed
//! engineering values:
//! - [`VariableKind`]: the closed set of variable variants, parsed from the
//!   `type` discriminator of a variable payload
//! - [`Value`]: a decoded engineering value
//! - word conversion (`decode` / `encode`) including word-swapped 32-bit
//!   layouts and raw byte arrays
//! - bit helpers for byte-array variables (LSB-first numbering)
//! - function-code tables per protocol, validated at construction
//!
//! ```text
//!   [u16; n] ──decode──▶ Value ──encode──▶ [u16; n]
//!                          │
//!                  Bytes ──┴── get_bit / set_bit / clear_bit / convert_to_bits
//! ```

pub mod bits;
mod error;
pub mod function_code;
mod kind;
mod value;

pub use bits::{clear_bit, convert_to_bits, get_bit, set_bit};
pub use error::{CodecError, Result};
pub use function_code::{AddressUnit, FunctionCodeSet, FunctionCodes, Protocol};
pub use kind::{bytes_to_words_be, words_to_bytes_be, VariableKind};
pub use value::Value;

//! Bit helpers for byte-array variables
//!
//! Bits are numbered LSB-first inside each byte. Setters return a new
//! buffer: the caller stages it as the variable's next value so change
//! detection sees a whole-value assignment.

use crate::error::{CodecError, Result};

fn check(bytes: &[u8], byte_index: usize, bit_index: u8) -> Result<()> {
    if byte_index >= bytes.len() || bit_index > 7 {
        return Err(CodecError::BitIndexOutOfRange {
            byte_index,
            bit_index,
        });
    }
    Ok(())
}

pub fn get_bit(bytes: &[u8], byte_index: usize, bit_index: u8) -> Result<bool> {
    check(bytes, byte_index, bit_index)?;
    Ok(bytes[byte_index] & (1 << bit_index) != 0)
}

pub fn set_bit(bytes: &[u8], byte_index: usize, bit_index: u8) -> Result<Vec<u8>> {
    check(bytes, byte_index, bit_index)?;
    let mut next = bytes.to_vec();
    next[byte_index] |= 1 << bit_index;
    Ok(next)
}

pub fn clear_bit(bytes: &[u8], byte_index: usize, bit_index: u8) -> Result<Vec<u8>> {
    check(bytes, byte_index, bit_index)?;
    let mut next = bytes.to_vec();
    next[byte_index] &= !(1 << bit_index);
    Ok(next)
}

/// Flatten bytes into booleans: bytes in order, bits LSB to MSB
pub fn convert_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .collect()
}

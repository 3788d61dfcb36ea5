//! # Bit Reversal Utilities
//!
//! Bit reflection used by the CRC engine for reflected-input and reflected-output
//! algorithm definitions.
//!
//! ```rust
//! use radiophy_rs::util::bitrev::{reflect, rev8};
//!
//! assert_eq!(rev8(0x01), 0x80);
//! assert_eq!(reflect(0x0001, 16), 0x8000);
//! ```

/// Reverse bits in a byte
///
/// # Examples
///
/// ```rust
/// use radiophy_rs::util::bitrev::rev8;
///
/// assert_eq!(rev8(0b1000_0000), 0b0000_0001);
/// assert_eq!(rev8(0b1010_1010), 0b0101_0101);
/// ```
#[inline]
pub fn rev8(mut byte: u8) -> u8 {
    // nibbles, then pairs, then single bits
    byte = (byte & 0xF0) >> 4 | (byte & 0x0F) << 4;
    byte = (byte & 0xCC) >> 2 | (byte & 0x33) << 2;
    byte = (byte & 0xAA) >> 1 | (byte & 0x55) << 1;
    byte
}

/// Reverse bits in a 16-bit value
#[inline]
pub fn rev16(value: u16) -> u16 {
    let low = rev8((value & 0xFF) as u8) as u16;
    let high = rev8((value >> 8) as u8) as u16;
    (low << 8) | high
}

/// Reverse bits in a 32-bit value
#[inline]
pub fn rev32(value: u32) -> u32 {
    (rev16((value & 0xFFFF) as u16) as u32) << 16 | rev16((value >> 16) as u16) as u32
}

/// Reflect the low `bits` bits of `value`; higher bits are discarded.
///
/// `bits` of 0 yields 0 and values above 32 are treated as 32.
#[inline]
pub fn reflect(value: u32, bits: u8) -> u32 {
    match bits {
        0 => 0,
        b if b >= 32 => rev32(value),
        b => rev32(value) >> (32 - u32::from(b)),
    }
}

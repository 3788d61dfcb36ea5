//! # Utility Modules
//!
//! Bit manipulation and hex helpers shared by the CRC engine, the bus
//! transaction layer and configuration loading.

pub mod bitrev;
pub mod hex;

pub use bitrev::{reflect, rev16, rev32, rev8};
pub use hex::{decode_hex, encode_hex, format_hex_compact, HexError};

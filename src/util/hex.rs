//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for SPI frame tracing and for hex-encoded keys in
//! configuration files.
//!
//! ```rust
//! use radiophy_rs::util::hex::{decode_hex, encode_hex, format_hex_compact};
//!
//! let data = [0x0D, 0x07, 0x40, 0x14];
//! assert_eq!(encode_hex(&data), "0d074014");
//! assert_eq!(format_hex_compact(&data), "0d 07 40 14");
//! assert_eq!(decode_hex("0d 07 40 14").unwrap(), data);
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to a lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode a hex string to bytes; whitespace is ignored.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }
    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format bytes as "68 31 31 68" for log lines
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

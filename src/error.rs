//! # Error Handling for Radio Drivers
//!
//! Every fallible operation in this crate returns [`RadioError`]. The variants are
//! grouped into coarse [`ErrorKind`]s so callers can branch on "timeout vs.
//! malformed vs. hardware-absent" without matching every variant or parsing
//! strings.
//!
//! ```rust
//! use radiophy_rs::error::{ErrorKind, RadioError};
//!
//! let err = RadioError::RxTimeout;
//! assert_eq!(err.kind(), ErrorKind::Timeout);
//! assert!(err.is_recoverable());
//! ```

use crate::hal::HalError;
use thiserror::Error;

/// Coarse classification of a [`RadioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out-of-range or mutually inconsistent configuration, detected before any write
    InvalidParameter,
    /// Chip identification failed after the full retry budget
    HardwareAbsent,
    /// Transmit/receive deadline exceeded or hardware-reported timeout
    Timeout,
    /// Payload exceeds a maximum transaction or packet length
    TransactionSize,
    /// Command reply failed a length, status or checksum expectation
    MalformedResponse,
    /// Bus transaction problem (write verification, platform fault)
    Bus,
    /// Configuration file could not be read or parsed
    Config,
    /// Operation not available on this chip or modem
    Unsupported,
}

/// Errors raised by the Hal, bus transaction layer and chip drivers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    /// Chip identification register never returned the expected value
    #[error("Chip not found after {attempts} attempts")]
    ChipNotFound { attempts: u8 },

    /// Carrier frequency outside the chip's bands
    #[error("Invalid frequency: {0} MHz")]
    InvalidFrequency(f32),

    /// Bit rate outside the supported range
    #[error("Invalid bit rate: {0} kbps")]
    InvalidBitRate(f32),

    /// Bit rate too high for the configured receiver bandwidth
    #[error("Bit rate {bit_rate} kbps too high for RX bandwidth {rx_bandwidth} kHz")]
    InvalidBitRateBandwidthRatio { bit_rate: f32, rx_bandwidth: f32 },

    /// Receiver bandwidth not in the chip's table
    #[error("Invalid RX bandwidth: {0} kHz")]
    InvalidRxBandwidth(f32),

    /// LoRa bandwidth not in the chip's table
    #[error("Invalid bandwidth: {0} kHz")]
    InvalidBandwidth(f32),

    /// LoRa spreading factor out of range
    #[error("Invalid spreading factor: {0}")]
    InvalidSpreadingFactor(u8),

    /// LoRa coding rate denominator out of range
    #[error("Invalid coding rate: 4/{0}")]
    InvalidCodingRate(u8),

    /// Frequency deviation out of range or too large for the bit rate
    #[error("Invalid frequency deviation: {0} kHz")]
    InvalidFrequencyDeviation(f32),

    /// Output power outside the amplifier's range
    #[error("Invalid output power: {0} dBm")]
    InvalidOutputPower(i8),

    /// Sync word empty, too long, contains zero bytes or bad error tolerance
    #[error("Invalid sync word: {0}")]
    InvalidSyncWord(String),

    /// Preamble length not supported
    #[error("Invalid preamble length: {0}")]
    InvalidPreambleLength(u16),

    /// Over-current protection limit out of range
    #[error("Invalid current limit: {0} mA")]
    InvalidCurrentLimit(f32),

    /// LNA gain step out of range
    #[error("Invalid gain: {0}")]
    InvalidGain(u8),

    /// Data shaping not supported in the active modulation
    #[error("Invalid data shaping")]
    InvalidDataShaping,

    /// Encoding not supported by the chip
    #[error("Invalid encoding")]
    InvalidEncoding,

    /// RSSI smoothing or offset out of range
    #[error("Invalid RSSI configuration: {0}")]
    InvalidRssiConfig(String),

    /// TCXO voltage not in the supported table
    #[error("Invalid TCXO voltage: {0} V")]
    InvalidTcxoVoltage(f32),

    /// Register bit range with msb > 7, lsb > 7 or lsb > msb
    #[error("Invalid bit range: msb {msb}, lsb {lsb}")]
    InvalidBitRange { msb: u8, lsb: u8 },

    /// CRC definition that the engine cannot compute
    #[error("Invalid CRC parameters: {0}")]
    InvalidCrcParams(String),

    /// Operation requires a different modem (e.g. FSK shaping on LoRa)
    #[error("Wrong modem for this operation")]
    WrongModem,

    /// Packet is longer than the chip's buffer
    #[error("Packet too long: {len} bytes (max {max})")]
    PacketTooLong { len: usize, max: usize },

    /// Burst or command frame longer than the maximum transaction length
    #[error("Transaction too long: {len} bytes (max {max})")]
    TransactionTooLong { len: usize, max: usize },

    /// Transmission did not complete within its budget
    #[error("Transmit timeout")]
    TxTimeout,

    /// Nothing was received before the hardware or software timeout
    #[error("Receive timeout")]
    RxTimeout,

    /// Received packet failed its CRC or header check
    #[error("CRC mismatch")]
    CrcMismatch,

    /// One-shot measurement did not report completion in time
    #[error("Measurement timeout: {0}")]
    MeasurementTimeout(&'static str),

    /// Register read back differs from the value written
    #[error("SPI write verification failed at register 0x{addr:02X}")]
    SpiWriteFailed { addr: u16 },

    /// Chip reported a command timeout or BUSY never cleared
    #[error("SPI command timeout")]
    SpiCommandTimeout,

    /// Chip rejected the command opcode or its parameters
    #[error("SPI command invalid")]
    SpiCommandInvalid,

    /// Chip failed to execute the command
    #[error("SPI command failed")]
    SpiCommandFailed,

    /// Reply did not match a length, status or checksum expectation
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Operation not available on this chip
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Configuration loading failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// Platform fault raised while constructing or using a Hal
    #[error("HAL error: {0}")]
    Hal(String),

    /// Transport collaborator failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RadioError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RadioError::ChipNotFound { .. } => ErrorKind::HardwareAbsent,
            RadioError::InvalidFrequency(_)
            | RadioError::InvalidBitRate(_)
            | RadioError::InvalidBitRateBandwidthRatio { .. }
            | RadioError::InvalidRxBandwidth(_)
            | RadioError::InvalidBandwidth(_)
            | RadioError::InvalidSpreadingFactor(_)
            | RadioError::InvalidCodingRate(_)
            | RadioError::InvalidFrequencyDeviation(_)
            | RadioError::InvalidOutputPower(_)
            | RadioError::InvalidSyncWord(_)
            | RadioError::InvalidPreambleLength(_)
            | RadioError::InvalidCurrentLimit(_)
            | RadioError::InvalidGain(_)
            | RadioError::InvalidDataShaping
            | RadioError::InvalidEncoding
            | RadioError::InvalidRssiConfig(_)
            | RadioError::InvalidTcxoVoltage(_)
            | RadioError::InvalidBitRange { .. }
            | RadioError::InvalidCrcParams(_)
            | RadioError::WrongModem => ErrorKind::InvalidParameter,
            RadioError::PacketTooLong { .. } | RadioError::TransactionTooLong { .. } => {
                ErrorKind::TransactionSize
            }
            RadioError::TxTimeout
            | RadioError::RxTimeout
            | RadioError::MeasurementTimeout(_)
            | RadioError::SpiCommandTimeout => ErrorKind::Timeout,
            RadioError::CrcMismatch
            | RadioError::SpiCommandInvalid
            | RadioError::SpiCommandFailed
            | RadioError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            RadioError::SpiWriteFailed { .. } | RadioError::Hal(_) | RadioError::Transport(_) => {
                ErrorKind::Bus
            }
            RadioError::Config(_) => ErrorKind::Config,
            RadioError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Timeouts and corrupted packets leave the driver in STANDBY; the caller may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout) || *self == RadioError::CrcMismatch
    }
}

impl From<HalError> for RadioError {
    fn from(err: HalError) -> Self {
        RadioError::Hal(err.to_string())
    }
}

impl From<serde_json::Error> for RadioError {
    fn from(err: serde_json::Error) -> Self {
        RadioError::Config(err.to_string())
    }
}

impl From<std::io::Error> for RadioError {
    fn from(err: std::io::Error) -> Self {
        RadioError::Config(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RadioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(RadioError::ChipNotFound { attempts: 10 }.kind(), ErrorKind::HardwareAbsent);
        assert_eq!(RadioError::InvalidFrequency(100.0).kind(), ErrorKind::InvalidParameter);
        assert_eq!(
            RadioError::PacketTooLong { len: 300, max: 255 }.kind(),
            ErrorKind::TransactionSize
        );
        assert_eq!(RadioError::TxTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            RadioError::MalformedResponse("short".into()).kind(),
            ErrorKind::MalformedResponse
        );
    }

    #[test]
    fn test_display_messages() {
        let err = RadioError::InvalidBitRange { msb: 2, lsb: 5 };
        assert_eq!(err.to_string(), "Invalid bit range: msb 2, lsb 5");
        let err = RadioError::SpiWriteFailed { addr: 0x01 };
        assert_eq!(err.to_string(), "SPI write verification failed at register 0x01");
    }

    #[test]
    fn test_recoverable() {
        assert!(RadioError::RxTimeout.is_recoverable());
        assert!(RadioError::CrcMismatch.is_recoverable());
        assert!(!RadioError::ChipNotFound { attempts: 10 }.is_recoverable());
    }
}

//! # Physical-Layer Interface
//!
//! [`PhysicalLayer`] is the one contract every chip driver implements and every upper
//! layer (MAC, session, transport adapters) consumes. Drivers guarantee that the
//! hardware is left in a known [`RadioState`] after every call:
//!
//! - `begin` ends in [`RadioState::Standby`]
//! - every blocking `transmit`/`receive` ends in [`RadioState::Standby`], whether it
//!   succeeded, timed out or received a corrupted packet
//! - configuration setters validate first, then force STANDBY, then write; rejected
//!   input leaves both the state and the cached [`LinkSettings`] untouched
//! - SLEEP is only ever entered by an explicit `sleep` call
//!
//! ```rust,no_run
//! use radiophy_rs::phy::PhysicalLayer;
//!
//! fn beacon<P: PhysicalLayer>(radio: &mut P) -> radiophy_rs::Result<()> {
//!     radio.set_frequency(868.1)?;
//!     radio.transmit(b"hello")?;
//!     radio.sleep()
//! }
//! ```

use crate::error::{RadioError, Result};
use crate::hal::InterruptHandler;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest sync word any supported chip accepts
pub const MAX_SYNC_WORD_LEN: usize = 8;

/// Driver operating state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioState {
    Sleep,
    Standby,
    FrequencySynthesis,
    Transmit,
    Receive,
    ReceiveContinuous,
    DirectTransmit,
    DirectReceive,
    ChannelActivityDetect,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioState::Sleep => "SLEEP",
            RadioState::Standby => "STANDBY",
            RadioState::FrequencySynthesis => "FREQUENCY_SYNTHESIS",
            RadioState::Transmit => "TRANSMIT",
            RadioState::Receive => "RECEIVE",
            RadioState::ReceiveContinuous => "RECEIVE_CONTINUOUS",
            RadioState::DirectTransmit => "DIRECT_TRANSMIT",
            RadioState::DirectReceive => "DIRECT_RECEIVE",
            RadioState::ChannelActivityDetect => "CAD",
        };
        f.write_str(name)
    }
}

/// Modulation family a driver is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Modem {
    #[default]
    Lora,
    /// FSK/GFSK, including OOK on chips that offer it
    Fsk,
}

impl fmt::Display for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Modem::Lora => "LoRa",
            Modem::Fsk => "FSK",
        })
    }
}

/// Gaussian filter applied to FSK symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataShaping {
    #[default]
    None,
    /// Gaussian, BT = 0.3
    Gaussian0_3,
    /// Gaussian, BT = 0.5
    Gaussian0_5,
    /// Gaussian, BT = 1.0
    Gaussian1_0,
}

/// Line coding applied to the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    Nrz,
    Manchester,
    Whitening,
}

/// Packet framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketLengthMode {
    /// Length byte precedes the payload; `max` bounds accepted packets
    Variable { max: u8 },
    /// Every packet is exactly `len` bytes
    Fixed { len: u8 },
}

impl Default for PacketLengthMode {
    fn default() -> Self {
        PacketLengthMode::Variable { max: 0xFF }
    }
}

/// Sync word of 1 to [`MAX_SYNC_WORD_LEN`] bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncWord {
    bytes: [u8; MAX_SYNC_WORD_LEN],
    len: u8,
}

impl SyncWord {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_SYNC_WORD_LEN {
            return Err(RadioError::InvalidSyncWord(format!(
                "length {} outside 1..={}",
                bytes.len(),
                MAX_SYNC_WORD_LEN
            )));
        }
        let mut out = [0u8; MAX_SYNC_WORD_LEN];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: out,
            len: bytes.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Outcome of a channel activity scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScan {
    Free,
    Detected,
}

/// Last-validated link configuration cached by a driver.
///
/// Fields that do not apply to a chip's modem stay `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkSettings {
    pub modem: Modem,
    pub frequency_mhz: f32,
    /// LoRa bandwidth or FSK receiver bandwidth, kHz
    pub bandwidth_khz: f32,
    pub spreading_factor: Option<u8>,
    /// Denominator of the 4/x coding rate
    pub coding_rate: Option<u8>,
    pub bit_rate_kbps: Option<f32>,
    pub frequency_deviation_khz: Option<f32>,
    pub output_power_dbm: i8,
    pub sync_word: SyncWord,
    pub preamble_length: u16,
    pub packet_length: PacketLengthMode,
    pub crc_enabled: bool,
    pub shaping: DataShaping,
    pub encoding: Encoding,
}

/// Uniform contract over all supported transceivers.
pub trait PhysicalLayer {
    /// Chip-specific `begin` parameters
    type Config;

    /// Initialize, reset and identify the chip, then apply `config`.
    fn begin(&mut self, config: &Self::Config) -> Result<()>;

    /// Pulse the reset line with the chip's datasheet timing.
    fn reset(&mut self);

    fn sleep(&mut self) -> Result<()>;

    fn standby(&mut self) -> Result<()>;

    fn state(&self) -> RadioState;

    /// Cached configuration; `None` until `begin` succeeds.
    fn settings(&self) -> Option<&LinkSettings>;

    fn set_frequency(&mut self, freq_mhz: f32) -> Result<()>;

    fn set_output_power(&mut self, power_dbm: i8) -> Result<()>;

    fn set_data_shaping(&mut self, shaping: DataShaping) -> Result<()>;

    fn set_encoding(&mut self, encoding: Encoding) -> Result<()>;

    /// Load `data` and start transmitting; completion is signalled on the IRQ line.
    fn start_transmit(&mut self, data: &[u8]) -> Result<()>;

    /// Transmit `data` and wait for completion or the transmit budget.
    fn transmit(&mut self, data: &[u8]) -> Result<()>;

    /// Start listening; a packet is signalled on the IRQ line.
    fn start_receive(&mut self) -> Result<()>;

    /// Wait for one packet and copy it into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Copy a received packet into `buf`. Only valid after a completion signal.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Length of the packet waiting in the chip's buffer.
    fn packet_length(&mut self) -> Result<usize>;

    /// RSSI of the last received packet, dBm
    fn rssi(&mut self) -> f32;

    /// One byte of entropy sampled from the RF noise floor.
    fn random_byte(&mut self) -> Result<u8>;

    /// Uniform-ish value in `0..max`, or 0 when `max <= 0`.
    fn random(&mut self, max: i32) -> Result<i32> {
        if max <= 0 {
            return Ok(0);
        }
        let mut value = 0u32;
        for _ in 0..4 {
            value = (value << 8) | u32::from(self.random_byte()?);
        }
        Ok((value % max as u32) as i32)
    }

    /// Value in `min..max`, or `min` when the range is empty.
    fn random_range(&mut self, min: i32, max: i32) -> Result<i32> {
        if min >= max {
            return Ok(min);
        }
        let span = (i64::from(max) - i64::from(min)).min(i64::from(i32::MAX)) as i32;
        Ok((i64::from(min) + i64::from(self.random(span)?)) as i32)
    }

    /// Attach `action` to the IRQ line; it runs in interrupt context.
    fn set_irq_action(&mut self, action: InterruptHandler);

    /// Detach any user action, keeping the driver's own pending flag.
    fn clear_irq_action(&mut self);

    fn set_transmit_complete_action(&mut self, action: InterruptHandler) {
        self.set_irq_action(action)
    }

    fn set_receive_complete_action(&mut self, action: InterruptHandler) {
        self.set_irq_action(action)
    }

    /// Unmodulated/direct-mode transmission, optionally retuning to raw `frf` first.
    fn transmit_direct(&mut self, _frf: Option<u32>) -> Result<()> {
        Err(RadioError::Unsupported("direct transmit"))
    }

    /// Direct-mode reception with the demodulated bit stream on a DIO pin.
    fn receive_direct(&mut self) -> Result<()> {
        Err(RadioError::Unsupported("direct receive"))
    }

    fn start_frequency_synthesis(&mut self) -> Result<()>;

    /// Channel activity detection, blocking until the scan completes.
    fn scan_channel(&mut self) -> Result<ChannelScan> {
        Err(RadioError::Unsupported("channel activity detection"))
    }

    /// Frequency synthesizer step, Hz
    fn freq_step(&self) -> f32;

    /// Effective data rate of the last blocking transmission, bits per second
    fn data_rate(&self) -> f32;

    fn max_packet_length(&self) -> usize;
}

/// Force STANDBY, then run `apply`.
///
/// Callers validate every parameter before calling this so rejected input never
/// touches the hardware. The chip is left in STANDBY.
pub fn in_standby<P, T, F>(phy: &mut P, apply: F) -> Result<T>
where
    P: PhysicalLayer + ?Sized,
    F: FnOnce(&mut P) -> Result<T>,
{
    phy.standby()?;
    apply(phy)
}

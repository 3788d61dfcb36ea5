//! SX126x opcodes, register addresses and command parameters.

use crate::error::{RadioError, Result};
use bitflags::bitflags;
use std::fmt;

// =============================================================================
// Opcodes
// =============================================================================

pub const CMD_SET_SLEEP: u8 = 0x84;
pub const CMD_SET_STANDBY: u8 = 0x80;
pub const CMD_SET_FS: u8 = 0xC1;
pub const CMD_SET_TX: u8 = 0x83;
pub const CMD_SET_RX: u8 = 0x82;
pub const CMD_SET_CAD: u8 = 0xC5;
pub const CMD_SET_TX_CONTINUOUS_WAVE: u8 = 0xD1;
pub const CMD_SET_REGULATOR_MODE: u8 = 0x96;
pub const CMD_CALIBRATE: u8 = 0x89;
pub const CMD_CALIBRATE_IMAGE: u8 = 0x98;
pub const CMD_SET_PA_CONFIG: u8 = 0x95;
pub const CMD_SET_RX_TX_FALLBACK_MODE: u8 = 0x93;
pub const CMD_WRITE_REGISTER: u8 = 0x0D;
pub const CMD_READ_REGISTER: u8 = 0x1D;
pub const CMD_WRITE_BUFFER: u8 = 0x0E;
pub const CMD_READ_BUFFER: u8 = 0x1E;
pub const CMD_SET_DIO_IRQ_PARAMS: u8 = 0x08;
pub const CMD_GET_IRQ_STATUS: u8 = 0x12;
pub const CMD_CLEAR_IRQ_STATUS: u8 = 0x02;
pub const CMD_SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
pub const CMD_SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
pub const CMD_SET_RF_FREQUENCY: u8 = 0x86;
pub const CMD_SET_PACKET_TYPE: u8 = 0x8A;
pub const CMD_SET_TX_PARAMS: u8 = 0x8E;
pub const CMD_SET_MODULATION_PARAMS: u8 = 0x8B;
pub const CMD_SET_PACKET_PARAMS: u8 = 0x8C;
pub const CMD_SET_CAD_PARAMS: u8 = 0x88;
pub const CMD_SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
pub const CMD_GET_STATUS: u8 = 0xC0;
pub const CMD_GET_RSSI_INST: u8 = 0x15;
pub const CMD_GET_RX_BUFFER_STATUS: u8 = 0x13;
pub const CMD_GET_PACKET_STATUS: u8 = 0x14;
pub const CMD_GET_DEVICE_ERRORS: u8 = 0x17;
pub const CMD_CLEAR_DEVICE_ERRORS: u8 = 0x07;
pub const CMD_GET_STATS: u8 = 0x10;

// =============================================================================
// Registers (16-bit addresses)
// =============================================================================

pub const REG_VERSION_STRING: u16 = 0x0320;
pub const REG_WHITENING_INITIAL_MSB: u16 = 0x06B8;
pub const REG_CRC_INITIAL_MSB: u16 = 0x06BC;
pub const REG_CRC_POLYNOMIAL_MSB: u16 = 0x06BE;
pub const REG_SYNC_WORD_0: u16 = 0x06C0;
pub const REG_NODE_ADDRESS: u16 = 0x06CD;
pub const REG_BROADCAST_ADDRESS: u16 = 0x06CE;
pub const REG_LORA_SYNC_WORD_MSB: u16 = 0x0740;
pub const REG_RANDOM_NUMBER_0: u16 = 0x0819;
pub const REG_SENSITIVITY_CONFIG: u16 = 0x0889;
pub const REG_RX_GAIN: u16 = 0x08AC;
pub const REG_TX_CLAMP_CONFIG: u16 = 0x08D8;
pub const REG_OCP_CONFIGURATION: u16 = 0x08E7;

/// Prefix of the version string on every SX126x part
pub const VERSION_PREFIX: &[u8] = b"SX126";
pub const VERSION_STRING_LEN: usize = 16;

// =============================================================================
// Parameters
// =============================================================================

pub const STANDBY_RC: u8 = 0x00;
pub const SLEEP_START_WARM: u8 = 0x04;
pub const SLEEP_RTC_OFF: u8 = 0x00;

pub const REGULATOR_LDO: u8 = 0x00;
pub const REGULATOR_DC_DC: u8 = 0x01;

pub const CALIBRATE_ALL: u8 = 0x7F;

pub const PACKET_TYPE_GFSK: u8 = 0x00;
pub const PACKET_TYPE_LORA: u8 = 0x01;
pub const RX_TX_FALLBACK_MODE_STDBY_RC: u8 = 0x20;

pub const CAD_ON_8_SYMB: u8 = 0x03;
pub const CAD_GOTO_STDBY: u8 = 0x00;
/// CAD detection peak is `sf + CAD_DET_PEAK_OFFSET`
pub const CAD_DET_PEAK_OFFSET: u8 = 13;
pub const CAD_DET_MIN: u8 = 10;

pub const LORA_HEADER_EXPLICIT: u8 = 0x00;
pub const LORA_HEADER_IMPLICIT: u8 = 0x01;
pub const LORA_CRC_OFF: u8 = 0x00;
pub const LORA_CRC_ON: u8 = 0x01;
pub const LORA_IQ_STANDARD: u8 = 0x00;
pub const LORA_LOW_DATA_RATE_OPTIMIZE_OFF: u8 = 0x00;
pub const LORA_LOW_DATA_RATE_OPTIMIZE_ON: u8 = 0x01;

// GFSK modulation parameters
pub const GFSK_SHAPING_NONE: u8 = 0x00;
pub const GFSK_SHAPING_BT_0_3: u8 = 0x08;
pub const GFSK_SHAPING_BT_0_5: u8 = 0x09;
pub const GFSK_SHAPING_BT_1_0: u8 = 0x0B;

// GFSK packet parameters
pub const GFSK_PREAMBLE_DETECT_16: u8 = 0x05;
pub const GFSK_ADDRESS_FILT_OFF: u8 = 0x00;
pub const GFSK_ADDRESS_FILT_NODE: u8 = 0x01;
pub const GFSK_ADDRESS_FILT_NODE_BROADCAST: u8 = 0x02;
pub const GFSK_PACKET_FIXED: u8 = 0x00;
pub const GFSK_PACKET_VARIABLE: u8 = 0x01;
pub const GFSK_CRC_OFF: u8 = 0x01;
pub const GFSK_CRC_1_BYTE: u8 = 0x00;
pub const GFSK_CRC_2_BYTE: u8 = 0x02;
pub const GFSK_CRC_1_BYTE_INV: u8 = 0x04;
pub const GFSK_CRC_2_BYTE_INV: u8 = 0x06;
pub const GFSK_WHITENING_OFF: u8 = 0x00;
pub const GFSK_WHITENING_ON: u8 = 0x01;

/// CCITT parameters of the default two-byte CRC
pub const GFSK_CRC_INITIAL: u16 = 0x1D0F;
pub const GFSK_CRC_POLYNOMIAL: u16 = 0x1021;
/// Whitening LFSR seed; only bit 8 lands in WHITENING_INITIAL_MSB
pub const GFSK_WHITENING_INITIAL: u16 = 0x0100;

/// GFSK sync word register bank size
pub const GFSK_SYNC_WORD_LEN: usize = 8;

/// GFSK receiver bandwidths (kHz, double-sideband) and their codes
pub const GFSK_RX_BANDWIDTHS: [(f32, u8); 21] = [
    (4.8, 0x1F),
    (5.8, 0x17),
    (7.3, 0x0F),
    (9.7, 0x1E),
    (11.7, 0x16),
    (14.6, 0x0E),
    (19.5, 0x1D),
    (23.4, 0x15),
    (29.3, 0x0D),
    (39.0, 0x1C),
    (46.9, 0x14),
    (58.6, 0x0C),
    (78.2, 0x1B),
    (93.8, 0x13),
    (117.3, 0x0B),
    (156.2, 0x1A),
    (187.2, 0x12),
    (234.3, 0x0A),
    (312.0, 0x19),
    (373.6, 0x11),
    (467.0, 0x09),
];

pub const RX_GAIN_POWER_SAVING: u8 = 0x94;
pub const RX_GAIN_BOOSTED: u8 = 0x96;

pub const DIO2_AS_IRQ: u8 = 0x00;
pub const DIO2_AS_RF_SWITCH: u8 = 0x01;

pub const RX_TIMEOUT_INF: u32 = 0xFF_FFFF;
pub const TX_TIMEOUT_NONE: u32 = 0x00_0000;

// SetPaConfig for the SX1262 high-power amplifier
pub const PA_DUTY_CYCLE: u8 = 0x04;
pub const PA_HP_MAX: u8 = 0x07;
pub const PA_DEVICE_SEL_SX1262: u8 = 0x00;
pub const PA_LUT: u8 = 0x01;
pub const PA_RAMP_200U: u8 = 0x04;

/// TX_CLAMP_CONFIG bits set to work around PA clamping with antenna mismatch
pub const TX_CLAMP_MASK: u8 = 0x1E;

/// SENSITIVITY_CONFIG bit cleared at 500 kHz bandwidth
pub const SENSITIVITY_BW500_BIT: u8 = 0x04;

/// Timer step for RX/TX timeouts and TCXO delay, µs
pub const TIMER_STEP_US: f32 = 15.625;

/// Over-current limit step, mA
pub const OCP_STEP_MA: f32 = 2.5;

/// LoRa bandwidths (kHz) and their modulation-parameter codes
pub const LORA_BANDWIDTHS: [(f32, u8); 10] = [
    (7.8, 0x00),
    (10.4, 0x08),
    (15.6, 0x01),
    (20.8, 0x09),
    (31.25, 0x02),
    (41.7, 0x0A),
    (62.5, 0x03),
    (125.0, 0x04),
    (250.0, 0x05),
    (500.0, 0x06),
];

/// DIO3 TCXO supply voltages (V) and their codes
pub const TCXO_VOLTAGES: [(f32, u8); 8] = [
    (1.6, 0x00),
    (1.7, 0x01),
    (1.8, 0x02),
    (2.2, 0x03),
    (2.4, 0x04),
    (2.7, 0x05),
    (3.0, 0x06),
    (3.3, 0x07),
];

/// Image calibration band edges (MHz, exclusive lower bound) and frequency pairs
pub const IMAGE_CALIBRATION: [(f32, [u8; 2]); 4] = [
    (900.0, [0xE1, 0xE9]),
    (850.0, [0xD7, 0xDB]),
    (770.0, [0xC1, 0xC5]),
    (460.0, [0x75, 0x81]),
];
pub const IMAGE_CALIBRATION_LOW: [u8; 2] = [0x6B, 0x6F];

pub fn bandwidth_code(bw_khz: f32) -> Option<u8> {
    LORA_BANDWIDTHS
        .iter()
        .find(|(bw, _)| (bw - bw_khz).abs() < 0.001)
        .map(|&(_, code)| code)
}

pub fn gfsk_bandwidth_code(rx_bw_khz: f32) -> Option<u8> {
    GFSK_RX_BANDWIDTHS
        .iter()
        .find(|(bw, _)| (bw - rx_bw_khz).abs() < 0.05)
        .map(|&(_, code)| code)
}

/// GFSK bit rate word, `32 * Fxtal / bit_rate`
pub fn gfsk_bit_rate_raw(br_kbps: f32) -> u32 {
    (1_024_000.0 / f64::from(br_kbps)) as u32
}

/// GFSK deviation word in synthesizer steps
pub fn gfsk_deviation_raw(dev_khz: f32) -> u32 {
    (f64::from(dev_khz) * 1000.0 * f64::from(1u32 << 25) / 32_000_000.0) as u32
}

pub fn tcxo_code(voltage: f32) -> Option<u8> {
    TCXO_VOLTAGES
        .iter()
        .find(|(v, _)| (v - voltage).abs() < 0.001)
        .map(|&(_, code)| code)
}

/// Image calibration pair covering `freq_mhz`
pub fn image_calibration(freq_mhz: f32) -> [u8; 2] {
    IMAGE_CALIBRATION
        .iter()
        .find(|(edge, _)| freq_mhz > *edge)
        .map_or(IMAGE_CALIBRATION_LOW, |&(_, pair)| pair)
}

/// LoRa sync word register pair with the control nibbles set
pub fn sync_word_bytes(sync_word: u8) -> [u8; 2] {
    [(sync_word & 0xF0) | 0x04, ((sync_word & 0x0F) << 4) | 0x04]
}

bitflags! {
    /// IRQ sources, as used by SetDioIrqParams, GetIrqStatus and ClearIrqStatus
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IrqFlags: u16 {
        const TX_DONE = 0x0001;
        const RX_DONE = 0x0002;
        const PREAMBLE_DETECTED = 0x0004;
        const SYNC_WORD_VALID = 0x0008;
        const HEADER_VALID = 0x0010;
        const HEADER_ERR = 0x0020;
        const CRC_ERR = 0x0040;
        const CAD_DONE = 0x0080;
        const CAD_DETECTED = 0x0100;
        const TIMEOUT = 0x0200;
    }
}

bitflags! {
    /// GetDeviceErrors bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceErrors: u16 {
        const RC64K_CALIB = 0x0001;
        const RC13M_CALIB = 0x0002;
        const PLL_CALIB = 0x0004;
        const ADC_CALIB = 0x0008;
        const IMG_CALIB = 0x0010;
        const XOSC_START = 0x0020;
        const PLL_LOCK = 0x0040;
        const PA_RAMP = 0x0100;
    }
}

// Status byte: chip mode in bits 6-4, command status in bits 3-1
pub const STATUS_MODE_MASK: u8 = 0b0111_0000;
pub const STATUS_CMD_MASK: u8 = 0b0000_1110;
pub const STATUS_DATA_AVAILABLE: u8 = 0b0000_0100;
pub const STATUS_CMD_TIMEOUT: u8 = 0b0000_0110;
pub const STATUS_CMD_INVALID: u8 = 0b0000_1000;
pub const STATUS_CMD_FAILED: u8 = 0b0000_1010;

/// Decode one status byte clocked out during a command.
///
/// 0x00 and 0xFF mean nothing is driving MISO.
pub fn parse_status(status: u8) -> Result<()> {
    if status == 0x00 || status == 0xFF {
        return Err(RadioError::MalformedResponse(format!(
            "status byte 0x{:02X}",
            status
        )));
    }
    match status & STATUS_CMD_MASK {
        STATUS_CMD_TIMEOUT => Err(RadioError::SpiCommandTimeout),
        STATUS_CMD_INVALID => Err(RadioError::SpiCommandInvalid),
        STATUS_CMD_FAILED => Err(RadioError::SpiCommandFailed),
        _ => Ok(()),
    }
}

/// Chip mode reported in the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipMode {
    StandbyRc,
    StandbyXosc,
    FrequencySynthesis,
    Receive,
    Transmit,
    Unknown(u8),
}

impl fmt::Display for ChipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipMode::StandbyRc => f.write_str("STDBY_RC"),
            ChipMode::StandbyXosc => f.write_str("STDBY_XOSC"),
            ChipMode::FrequencySynthesis => f.write_str("FS"),
            ChipMode::Receive => f.write_str("RX"),
            ChipMode::Transmit => f.write_str("TX"),
            ChipMode::Unknown(raw) => write!(f, "mode {}", raw),
        }
    }
}

/// Decoded GetStatus reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipStatus(pub u8);

impl ChipStatus {
    pub fn mode(&self) -> ChipMode {
        match (self.0 & STATUS_MODE_MASK) >> 4 {
            0x2 => ChipMode::StandbyRc,
            0x3 => ChipMode::StandbyXosc,
            0x4 => ChipMode::FrequencySynthesis,
            0x5 => ChipMode::Receive,
            0x6 => ChipMode::Transmit,
            other => ChipMode::Unknown(other),
        }
    }

    /// Command status field, bits 3-1 left in position
    pub fn command_status(&self) -> u8 {
        self.0 & STATUS_CMD_MASK
    }

    pub fn data_available(&self) -> bool {
        self.command_status() == STATUS_DATA_AVAILABLE
    }
}

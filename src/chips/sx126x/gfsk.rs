//! GFSK packet modem of the SX126x.
//!
//! [`Sx126x::begin_fsk`] selects the GFSK packet type. Modulation and packet
//! parameters are written as whole command frames, so every setter updates the
//! settings cache, rewrites the frame and restores the cache when the chip rejects
//! it. The bit rate, the deviation and the receiver bandwidth are checked against
//! each other with Carson's rule: `2 * deviation + bit_rate <= rx_bandwidth`.
//!
//! Sync word, CRC seed and polynomial, whitening seed and addresses live in
//! registers.

use super::commands::*;
use super::{Sx126x, DEFAULT_TCXO_DELAY_US, MAX_PACKET_LENGTH};
use crate::chips::fsk_airtime_us;
use crate::config::Sx126xFskConfig;
use crate::error::{RadioError, Result};
use crate::hal::Hal;
use crate::module::{CommandFrame, RfSwitchMode};
use crate::phy::{
    in_standby, DataShaping, Encoding, Modem, PacketLengthMode, PhysicalLayer, RadioState,
    SyncWord,
};
use std::ops::RangeInclusive;

pub const BIT_RATE_RANGE_KBPS: RangeInclusive<f32> = 0.6..=300.0;
pub const MAX_FREQUENCY_DEVIATION_KHZ: f32 = 200.0;

/// Carson bandwidth of the signal fits the receiver
fn fits_bandwidth(br_kbps: f32, dev_khz: f32, rx_bw_khz: f32) -> bool {
    2.0 * dev_khz + br_kbps <= rx_bw_khz
}

fn shaping_code(shaping: DataShaping) -> u8 {
    match shaping {
        DataShaping::None => GFSK_SHAPING_NONE,
        DataShaping::Gaussian0_3 => GFSK_SHAPING_BT_0_3,
        DataShaping::Gaussian0_5 => GFSK_SHAPING_BT_0_5,
        DataShaping::Gaussian1_0 => GFSK_SHAPING_BT_1_0,
    }
}

/// GFSK-only state that lives in the command frames rather than in [`LinkSettings`]
///
/// [`LinkSettings`]: crate::phy::LinkSettings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct GfskFrame {
    pub rx_bw_code: u8,
    pub crc_type: u8,
    pub address_filter: u8,
}

impl Default for GfskFrame {
    fn default() -> Self {
        Self {
            rx_bw_code: 0x1A,
            crc_type: GFSK_CRC_2_BYTE_INV,
            address_filter: GFSK_ADDRESS_FILT_OFF,
        }
    }
}

fn crc_length(crc_type: u8) -> usize {
    match crc_type {
        GFSK_CRC_1_BYTE | GFSK_CRC_1_BYTE_INV => 1,
        GFSK_CRC_2_BYTE | GFSK_CRC_2_BYTE_INV => 2,
        _ => 0,
    }
}

impl<H: Hal> Sx126x<H> {
    /// Initialize the chip in GFSK packet mode.
    pub fn begin_fsk(&mut self, config: &Sx126xFskConfig) -> Result<()> {
        self.start_chip()?;

        let snapshot = self.core.settings.clone();
        if let Err(err) = self.apply_fsk(config) {
            log::warn!("SX126x: GFSK begin failed: {}", err);
            self.core.settings = snapshot;
            return Err(err);
        }
        self.core.ready = true;
        log::info!(
            "SX1262 ready at {} MHz, GFSK {} kbps / {} kHz, {} dBm",
            config.frequency_mhz,
            config.bit_rate_kbps,
            config.frequency_deviation_khz,
            config.output_power_dbm
        );
        Ok(())
    }

    fn apply_fsk(&mut self, config: &Sx126xFskConfig) -> Result<()> {
        self.standby()?;
        self.config(config.use_regulator_ldo, Modem::Fsk)?;
        if config.tcxo_voltage > 0.0 {
            self.set_tcxo(config.tcxo_voltage, DEFAULT_TCXO_DELAY_US)?;
        }
        self.set_rx_bandwidth(config.rx_bandwidth_khz)?;
        self.set_bit_rate(config.bit_rate_kbps)?;
        self.set_frequency_deviation(config.frequency_deviation_khz)?;
        self.set_data_shaping(config.shaping)?;
        self.set_current_limit(config.current_limit_ma)?;
        self.set_fsk_sync_word(&config.sync_word)?;
        self.set_crc(config.crc)?;
        self.set_encoding(config.encoding)?;
        self.set_preamble_length(config.preamble_length)?;
        match config.packet_length {
            PacketLengthMode::Variable { max } => self.variable_packet_length_mode(max)?,
            PacketLengthMode::Fixed { len } => self.fixed_packet_length_mode(len)?,
        }
        self.disable_address_filtering()?;
        if let Some(node) = config.node_address {
            self.set_node_address(node)?;
        }
        if let Some(broadcast) = config.broadcast_address {
            self.set_broadcast_address(broadcast)?;
        }
        self.set_dio2_as_rf_switch(config.dio2_rf_switch)?;
        self.set_frequency(config.frequency_mhz)?;
        self.set_output_power(config.output_power_dbm)?;
        self.fix_pa_clamping()?;
        self.standby()
    }

    // ----- command frames -----

    pub(super) fn write_fsk_modulation_params(&mut self) -> Result<()> {
        let s = &self.core.settings;
        let br = gfsk_bit_rate_raw(s.bit_rate_kbps.unwrap_or(4.8));
        let dev = gfsk_deviation_raw(s.frequency_deviation_khz.unwrap_or(5.0));
        let frame = CommandFrame::new(CMD_SET_MODULATION_PARAMS)
            .u24(br)
            .u8(shaping_code(s.shaping))
            .u8(self.gfsk.rx_bw_code)
            .u24(dev);
        self.send(frame)
    }

    pub(super) fn write_fsk_packet_params(&mut self, payload_len: u8) -> Result<()> {
        let s = &self.core.settings;
        let packet_type = match s.packet_length {
            PacketLengthMode::Variable { .. } => GFSK_PACKET_VARIABLE,
            PacketLengthMode::Fixed { .. } => GFSK_PACKET_FIXED,
        };
        let whitening = if s.encoding == Encoding::Whitening {
            GFSK_WHITENING_ON
        } else {
            GFSK_WHITENING_OFF
        };
        let frame = CommandFrame::new(CMD_SET_PACKET_PARAMS)
            .u16(s.preamble_length)
            .u8(GFSK_PREAMBLE_DETECT_16)
            .u8(s.sync_word.len() as u8 * 8)
            .u8(self.gfsk.address_filter)
            .u8(packet_type)
            .u8(payload_len)
            .u8(self.gfsk.crc_type)
            .u8(whitening);
        self.send(frame)
    }

    /// Payload length field outside of transmit: the maximum or the fixed length
    pub(super) fn fsk_rx_payload_len(&self) -> u8 {
        match self.core.settings.packet_length {
            PacketLengthMode::Variable { max } => max,
            PacketLengthMode::Fixed { len } => len,
        }
    }

    fn rewrite_fsk_packet_params(&mut self) -> Result<()> {
        let len = self.fsk_rx_payload_len();
        self.write_fsk_packet_params(len)
    }

    // ----- GFSK link configuration -----

    /// Bit rate, 0.6 to 300 kbps.
    pub fn set_bit_rate(&mut self, br_kbps: f32) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        let s = &self.core.settings;
        if !BIT_RATE_RANGE_KBPS.contains(&br_kbps) {
            return Err(RadioError::InvalidBitRate(br_kbps));
        }
        if let Some(dev) = s.frequency_deviation_khz {
            if s.bandwidth_khz > 0.0 && !fits_bandwidth(br_kbps, dev, s.bandwidth_khz) {
                return Err(RadioError::InvalidBitRate(br_kbps));
            }
        }
        in_standby(self, |radio| {
            let previous = radio.core.settings.bit_rate_kbps;
            radio.core.settings.bit_rate_kbps = Some(br_kbps);
            if let Err(err) = radio.write_fsk_modulation_params() {
                radio.core.settings.bit_rate_kbps = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// Frequency deviation, at most 200 kHz.
    pub fn set_frequency_deviation(&mut self, dev_khz: f32) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        let s = &self.core.settings;
        if !(0.0..=MAX_FREQUENCY_DEVIATION_KHZ).contains(&dev_khz) {
            return Err(RadioError::InvalidFrequencyDeviation(dev_khz));
        }
        if let Some(br) = s.bit_rate_kbps {
            if s.bandwidth_khz > 0.0 && !fits_bandwidth(br, dev_khz, s.bandwidth_khz) {
                return Err(RadioError::InvalidFrequencyDeviation(dev_khz));
            }
        }
        in_standby(self, |radio| {
            let previous = radio.core.settings.frequency_deviation_khz;
            radio.core.settings.frequency_deviation_khz = Some(dev_khz);
            if let Err(err) = radio.write_fsk_modulation_params() {
                radio.core.settings.frequency_deviation_khz = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// Receiver bandwidth, one of the 4.8 to 467 kHz steps.
    pub fn set_rx_bandwidth(&mut self, rx_bw_khz: f32) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        let code =
            gfsk_bandwidth_code(rx_bw_khz).ok_or(RadioError::InvalidRxBandwidth(rx_bw_khz))?;
        let s = &self.core.settings;
        if let (Some(br), Some(dev)) = (s.bit_rate_kbps, s.frequency_deviation_khz) {
            if !fits_bandwidth(br, dev, rx_bw_khz) {
                return Err(RadioError::InvalidRxBandwidth(rx_bw_khz));
            }
        }
        in_standby(self, |radio| {
            let previous = (radio.core.settings.bandwidth_khz, radio.gfsk.rx_bw_code);
            radio.core.settings.bandwidth_khz = rx_bw_khz;
            radio.gfsk.rx_bw_code = code;
            if let Err(err) = radio.write_fsk_modulation_params() {
                (radio.core.settings.bandwidth_khz, radio.gfsk.rx_bw_code) = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    pub(super) fn set_fsk_shaping(&mut self, shaping: DataShaping) -> Result<()> {
        in_standby(self, |radio| {
            let previous = radio.core.settings.shaping;
            radio.core.settings.shaping = shaping;
            if let Err(err) = radio.write_fsk_modulation_params() {
                radio.core.settings.shaping = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// NRZ or whitening; the chip has no Manchester coder.
    pub(super) fn set_fsk_encoding(&mut self, encoding: Encoding) -> Result<()> {
        if encoding == Encoding::Manchester {
            return Err(RadioError::InvalidEncoding);
        }
        in_standby(self, |radio| {
            if encoding == Encoding::Whitening {
                radio.set_whitening_seed(GFSK_WHITENING_INITIAL)?;
            }
            let previous = radio.core.settings.encoding;
            radio.core.settings.encoding = encoding;
            if let Err(err) = radio.rewrite_fsk_packet_params() {
                radio.core.settings.encoding = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// Nine-bit whitening seed. Bits 7-1 of the MSB register are reserved.
    fn set_whitening_seed(&mut self, seed: u16) -> Result<()> {
        let [hi, lo] = seed.to_be_bytes();
        let msb = self.read_register(REG_WHITENING_INITIAL_MSB)?;
        self.write_registers(REG_WHITENING_INITIAL_MSB, &[(msb & 0xFE) | (hi & 0x01), lo])
    }

    /// 1 to 8 sync word bytes, sent most significant first.
    pub fn set_fsk_sync_word(&mut self, sync_word: &[u8]) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        let sw = SyncWord::new(sync_word)?;
        if sw.len() > GFSK_SYNC_WORD_LEN {
            return Err(RadioError::InvalidSyncWord(format!(
                "{} bytes, at most {}",
                sw.len(),
                GFSK_SYNC_WORD_LEN
            )));
        }
        in_standby(self, |radio| {
            radio.write_registers(REG_SYNC_WORD_0, sw.as_bytes())?;
            let previous = std::mem::replace(&mut radio.core.settings.sync_word, sw);
            if let Err(err) = radio.rewrite_fsk_packet_params() {
                radio.core.settings.sync_word = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// CRC of `len` bytes (0 disables it) with the given seed and polynomial.
    pub fn set_fsk_crc(
        &mut self,
        len: u8,
        initial: u16,
        polynomial: u16,
        inverted: bool,
    ) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        let crc_type = match (len, inverted) {
            (0, _) => GFSK_CRC_OFF,
            (1, false) => GFSK_CRC_1_BYTE,
            (1, true) => GFSK_CRC_1_BYTE_INV,
            (2, false) => GFSK_CRC_2_BYTE,
            (2, true) => GFSK_CRC_2_BYTE_INV,
            _ => return Err(RadioError::InvalidCrcParams(format!("{} CRC bytes", len))),
        };
        in_standby(self, |radio| {
            if len > 0 {
                radio.write_registers(REG_CRC_INITIAL_MSB, &initial.to_be_bytes())?;
                radio.write_registers(REG_CRC_POLYNOMIAL_MSB, &polynomial.to_be_bytes())?;
            }
            let previous = (radio.gfsk.crc_type, radio.core.settings.crc_enabled);
            radio.gfsk.crc_type = crc_type;
            radio.core.settings.crc_enabled = len > 0;
            if let Err(err) = radio.rewrite_fsk_packet_params() {
                (radio.gfsk.crc_type, radio.core.settings.crc_enabled) = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    pub fn variable_packet_length_mode(&mut self, max_len: u8) -> Result<()> {
        self.set_packet_format(PacketLengthMode::Variable { max: max_len })
    }

    pub fn fixed_packet_length_mode(&mut self, len: u8) -> Result<()> {
        if len == 0 {
            return Err(RadioError::PacketTooLong {
                len: 0,
                max: MAX_PACKET_LENGTH,
            });
        }
        self.set_packet_format(PacketLengthMode::Fixed { len })
    }

    fn set_packet_format(&mut self, format: PacketLengthMode) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        in_standby(self, |radio| {
            let previous = std::mem::replace(&mut radio.core.settings.packet_length, format);
            if let Err(err) = radio.rewrite_fsk_packet_params() {
                radio.core.settings.packet_length = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// Accept only packets addressed to `node`.
    pub fn set_node_address(&mut self, node: u8) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        in_standby(self, |radio| {
            radio.write_registers(REG_NODE_ADDRESS, &[node])?;
            radio.set_address_filter(GFSK_ADDRESS_FILT_NODE)
        })
    }

    /// Accept packets addressed to the node or to `broadcast`.
    pub fn set_broadcast_address(&mut self, broadcast: u8) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        in_standby(self, |radio| {
            radio.write_registers(REG_BROADCAST_ADDRESS, &[broadcast])?;
            radio.set_address_filter(GFSK_ADDRESS_FILT_NODE_BROADCAST)
        })
    }

    pub fn disable_address_filtering(&mut self) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        in_standby(self, |radio| radio.set_address_filter(GFSK_ADDRESS_FILT_OFF))
    }

    fn set_address_filter(&mut self, filter: u8) -> Result<()> {
        let previous = std::mem::replace(&mut self.gfsk.address_filter, filter);
        if let Err(err) = self.rewrite_fsk_packet_params() {
            self.gfsk.address_filter = previous;
            return Err(err);
        }
        Ok(())
    }

    fn address_filtering(&self) -> bool {
        self.gfsk.address_filter != GFSK_ADDRESS_FILT_OFF
    }

    // ----- GFSK packet I/O -----

    /// Transmit `data`, prefixed with `addr` when address filtering is enabled.
    pub fn start_transmit_to(&mut self, data: &[u8], addr: u8) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        let addr_len = usize::from(self.address_filtering());
        let (max, fixed) = match self.core.settings.packet_length {
            PacketLengthMode::Variable { max } => {
                let max = usize::from(max);
                (max - addr_len.min(max), None)
            }
            PacketLengthMode::Fixed { len } => {
                let len = usize::from(len);
                (len - addr_len.min(len), Some(len))
            }
        };
        if data.len() > max {
            return Err(RadioError::PacketTooLong {
                len: data.len(),
                max,
            });
        }

        let mut packet = Vec::with_capacity(fixed.unwrap_or(data.len() + addr_len));
        if self.address_filtering() {
            packet.push(addr);
        }
        packet.extend_from_slice(data);
        if let Some(len) = fixed {
            packet.resize(len, 0x00);
        }

        self.standby()?;
        self.write_fsk_packet_params(packet.len() as u8)?;
        self.set_dio_irq_params(IrqFlags::TX_DONE | IrqFlags::TIMEOUT, IrqFlags::TX_DONE)?;
        self.set_buffer_base_address()?;
        self.core
            .module
            .write_command(&[CMD_WRITE_BUFFER, 0x00], &packet)?;
        self.clear_irq_status(IrqFlags::all())?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Tx);
        self.send(CommandFrame::new(CMD_SET_TX).u24(TX_TIMEOUT_NONE))?;
        self.core.set_state(RadioState::Transmit);
        Ok(())
    }

    /// Read a GFSK packet, dropping the address byte when filtering is on.
    pub(super) fn read_fsk_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.standby()?;
        let irq = self.irq_status()?;

        let mut rx_status = [0u8; 2];
        self.core
            .module
            .read_command(&[CMD_GET_RX_BUFFER_STATUS], &mut rx_status)?;
        let [len, offset] = rx_status;
        let (len, offset) = if self.address_filtering() && len > 0 {
            (usize::from(len) - 1, offset.wrapping_add(1))
        } else {
            (usize::from(len), offset)
        };
        let n = len.min(buf.len());
        self.core
            .module
            .read_command(&[CMD_READ_BUFFER, offset], &mut buf[..n])?;
        self.clear_irq_status(IrqFlags::all())?;

        if irq.contains(IrqFlags::CRC_ERR) {
            log::debug!("SX126x: CRC error in {}-byte GFSK packet", len);
            return Err(RadioError::CrcMismatch);
        }
        Ok(n)
    }

    /// Preamble, sync word, length byte, address, payload and CRC, µs
    pub(super) fn fsk_time_on_air_us(&self, len: usize) -> u64 {
        let s = &self.core.settings;
        let length_byte = usize::from(matches!(s.packet_length, PacketLengthMode::Variable { .. }));
        let bytes = length_byte
            + usize::from(self.address_filtering())
            + len
            + crc_length(self.gfsk.crc_type);
        let bits = usize::from(s.preamble_length) + 8 * s.sync_word.len() + 8 * bytes;
        fsk_airtime_us(bits, s.bit_rate_kbps.unwrap_or(4.8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carson_rule() {
        assert!(fits_bandwidth(4.8, 5.0, 156.2));
        assert!(fits_bandwidth(100.0, 50.0, 234.3));
        assert!(!fits_bandwidth(100.0, 50.0, 187.2));
    }

    #[test]
    fn test_crc_lengths() {
        assert_eq!(crc_length(GFSK_CRC_OFF), 0);
        assert_eq!(crc_length(GFSK_CRC_1_BYTE_INV), 1);
        assert_eq!(crc_length(GFSK_CRC_2_BYTE), 2);
        assert_eq!(shaping_code(DataShaping::Gaussian0_5), GFSK_SHAPING_BT_0_5);
    }
}

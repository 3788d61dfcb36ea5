//! # RF69 FSK/OOK Transceiver Driver
//!
//! Driver for the HopeRF RFM69 family (Semtech SX1231 core) over the register
//! protocol. Supports packet mode with variable or fixed length up to the 64-byte
//! FIFO, optional node/broadcast address filtering, hardware CRC and AES, the
//! PA1/PA2 high-power path of RFM69H(C)W modules, the on-chip temperature sensor
//! and continuous (direct) mode.
//!
//! DIO0 signals PacketSent in transmit and PayloadReady in receive; DIO1 signals
//! the hardware RX timeout when `receive` arms it.
//!
//! ```rust,no_run
//! use radiophy_rs::chips::Rf69;
//! use radiophy_rs::config::Rf69Config;
//! use radiophy_rs::hal::EmulatedHal;
//! use radiophy_rs::module::{Module, ModulePins, SpiConfig};
//! use radiophy_rs::phy::PhysicalLayer;
//! use std::{cell::RefCell, rc::Rc};
//!
//! let hal = Rc::new(RefCell::new(EmulatedHal::new()));
//! let module = Module::new(hal, ModulePins::new(8, 24, 25, 23), SpiConfig::default());
//! let mut radio = Rf69::new(module);
//! radio.begin(&Rf69Config { high_power: true, ..Rf69Config::default() })?;
//! radio.transmit(b"hello")?;
//! # Ok::<(), radiophy_rs::RadioError>(())
//! ```

pub mod registers;

use self::registers::*;
use super::{fsk_airtime_us, fsk_rx_bandwidth_bits, ChipCore, WaitOutcome};
use crate::config::Rf69Config;
use crate::error::{RadioError, Result};
use crate::hal::{Hal, InterruptHandler, Level, PinMode};
use crate::module::{Module, RfSwitchMode};
use crate::phy::{
    in_standby, DataShaping, Encoding, LinkSettings, Modem, PacketLengthMode, PhysicalLayer,
    RadioState, SyncWord,
};

/// Synthesizer step, Hz
pub const FREQ_STEP_HZ: f32 = 61.035_156;

/// Allowed carrier bands, MHz (exclusive bounds)
const FREQUENCY_BANDS: [(f32, f32); 3] = [(290.0, 340.0), (431.0, 510.0), (862.0, 1020.0)];

/// Fixed TX budget on top of the airtime multiple, µs
const TX_BASE_BUDGET_US: u64 = 5_000;

/// Bounded wait for one-shot measurements, ms
const MEASUREMENT_TIMEOUT_MS: u64 = 100;

/// Length byte, CRC and a worst-case sync word
const PACKET_OVERHEAD_BYTES: usize = 1 + 2 + 8;

pub(crate) fn validate_frequency(freq_mhz: f32) -> Result<u32> {
    if !FREQUENCY_BANDS
        .iter()
        .any(|&(lo, hi)| freq_mhz > lo && freq_mhz < hi)
    {
        return Err(RadioError::InvalidFrequency(freq_mhz));
    }
    let frf = f64::from(freq_mhz) * f64::from(1u32 << DIV_EXPONENT) / f64::from(CRYSTAL_FREQ_MHZ);
    Ok(frf as u32)
}

/// Register code for `rx_bw_khz`, `None` when not in the table
pub(crate) fn rx_bandwidth_code(rx_bw_khz: f32) -> Option<u8> {
    fsk_rx_bandwidth_bits(rx_bw_khz).map(|bits| RX_BW_DCC_FREQ | bits)
}

/// (PA_LEVEL value, needs boost registers)
pub(crate) fn power_setting(power_dbm: i8, high_power: bool) -> Result<(u8, bool)> {
    let invalid = RadioError::InvalidOutputPower(power_dbm);
    if !high_power {
        if !(-18..=13).contains(&power_dbm) {
            return Err(invalid);
        }
        return Ok((PA0_ON | (power_dbm + 18) as u8, false));
    }
    match power_dbm {
        -2..=13 => Ok((PA1_ON | (power_dbm + 18) as u8, false)),
        14..=17 => Ok((PA1_PA2_ON | (power_dbm + 14) as u8, false)),
        18..=20 => Ok((PA1_PA2_ON | (power_dbm + 11) as u8, true)),
        _ => Err(invalid),
    }
}

/// RF69 driver
pub struct Rf69<H: Hal> {
    core: ChipCore<H>,
    high_power: bool,
    ook: bool,
    address_filtering: bool,
    temperature_offset: i16,
    packet_length: Option<usize>,
    last_rssi: f32,
}

impl<H: Hal> Rf69<H> {
    pub fn new(module: Module<H>) -> Self {
        Self {
            core: ChipCore::new(module, "RF69"),
            high_power: false,
            ook: false,
            address_filtering: false,
            temperature_offset: 0,
            packet_length: None,
            last_rssi: 0.0,
        }
    }

    pub fn module(&self) -> &Module<H> {
        self.core.module()
    }

    pub fn module_mut(&mut self) -> &mut Module<H> {
        self.core.module_mut()
    }

    fn set_mode(&mut self, mode: u8, state: RadioState) -> Result<()> {
        self.core
            .module
            .set_register_field_checked(REG_OP_MODE, mode, 4, 2, 0b0001_1100)?;
        self.core.set_state(state);
        Ok(())
    }

    fn clear_irq_flags(&mut self) {
        self.core.module.write_register(REG_IRQ_FLAGS_1, 0xFF);
        self.core.module.write_register(REG_IRQ_FLAGS_2, 0xFF);
        self.core.pending.clear();
    }

    fn config(&mut self) -> Result<()> {
        let m = &mut self.core.module;
        m.set_register_field(REG_OP_MODE, SEQUENCER_ON | LISTEN_OFF, 7, 6)?;
        m.set_register_field(REG_OP_MODE, MODE_STANDBY, 4, 2)?;
        m.set_register(REG_OCP, OCP_ON | OCP_TRIM_95_MA)?;
        m.set_register_field(
            REG_DATA_MODUL,
            DATA_MODE_PACKET | MODULATION_FSK | SHAPING_NONE,
            6,
            0,
        )?;
        m.set_register(REG_RSSI_THRESH, RSSI_THRESHOLD_DEFAULT)?;
        m.write_register(REG_IRQ_FLAGS_2, IRQ_FIFO_OVERRUN);
        m.set_register_field(REG_DIO_MAPPING_2, CLK_OUT_OFF, 2, 0)?;
        m.set_register(
            REG_PACKET_CONFIG_1,
            PACKET_FORMAT_VARIABLE | DC_FREE_NONE | CRC_ON | CRC_AUTOCLEAR_OFF | ADDRESS_FILTERING_OFF,
        )?;
        m.set_register_field(REG_PACKET_CONFIG_2, AUTO_RX_RESTART_ON, 1, 1)?;
        m.set_register(REG_PAYLOAD_LENGTH, FIFO_SIZE as u8)?;
        m.set_register(REG_FIFO_THRESH, TX_START_FIFO_NOT_EMPTY | FIFO_THRESHOLD)?;
        m.set_register(REG_TEST_DAGC, CONTINUOUS_DAGC_LOW_BETA_OFF)?;
        m.set_register(REG_RX_TIMEOUT_1, RX_TIMEOUT_OFF)?;
        m.set_register(REG_RX_TIMEOUT_2, RX_TIMEOUT_OFF)?;
        self.core.set_state(RadioState::Standby);

        let settings = &mut self.core.settings;
        settings.modem = Modem::Fsk;
        settings.encoding = Encoding::Nrz;
        settings.shaping = DataShaping::None;
        settings.crc_enabled = true;
        settings.packet_length = PacketLengthMode::Variable {
            max: FIFO_SIZE as u8,
        };
        settings.bit_rate_kbps = None;
        settings.frequency_deviation_khz = None;
        settings.bandwidth_khz = 0.0;
        self.address_filtering = false;
        Ok(())
    }

    fn apply(&mut self, config: &Rf69Config) -> Result<()> {
        self.config()?;
        self.high_power = config.high_power;
        self.set_ook(config.ook)?;
        self.set_frequency(config.frequency_mhz)?;
        self.set_rx_bandwidth(config.rx_bandwidth_khz)?;
        self.set_bit_rate(config.bit_rate_kbps)?;
        self.set_frequency_deviation(config.frequency_deviation_khz)?;
        self.set_output_power(config.output_power_dbm)?;
        self.set_preamble_length(config.preamble_length)?;
        self.set_sync_word(&config.sync_word, config.sync_max_errors)?;
        match config.packet_length {
            PacketLengthMode::Variable { max } => self.variable_packet_length_mode(max)?,
            PacketLengthMode::Fixed { len } => self.fixed_packet_length_mode(len)?,
        }
        self.set_crc(config.crc)?;
        self.set_data_shaping(config.shaping)?;
        self.set_encoding(config.encoding)?;
        if let Some(node) = config.node_address {
            self.set_node_address(node)?;
        }
        if let Some(broadcast) = config.broadcast_address {
            self.set_broadcast_address(broadcast)?;
        }
        if let Some(key) = config.aes_key {
            self.set_aes_key(&key)?;
            self.set_aes(true)?;
        }
        self.standby()
    }

    // ----- link configuration -----

    /// Bit rate in kbps, 1.2 to 300 and below `2000 * rx_bandwidth`.
    pub fn set_bit_rate(&mut self, br_kbps: f32) -> Result<()> {
        if !(1.2..=300.0).contains(&br_kbps) {
            return Err(RadioError::InvalidBitRate(br_kbps));
        }
        let rx_bw = self.core.settings.bandwidth_khz;
        if rx_bw > 0.0 && br_kbps >= 2000.0 * rx_bw {
            return Err(RadioError::InvalidBitRateBandwidthRatio {
                bit_rate: br_kbps,
                rx_bandwidth: rx_bw,
            });
        }
        if let Some(dev) = self.core.settings.frequency_deviation_khz {
            if dev + br_kbps / 2.0 > 500.0 {
                return Err(RadioError::InvalidBitRate(br_kbps));
            }
        }
        let raw = (32_000.0 / br_kbps) as u16;
        in_standby(self, |radio| {
            let [msb, lsb] = raw.to_be_bytes();
            radio.core.module.set_register(REG_BITRATE_MSB, msb)?;
            radio.core.module.set_register(REG_BITRATE_LSB, lsb)?;
            radio.core.settings.bit_rate_kbps = Some(br_kbps);
            Ok(())
        })
    }

    pub fn set_rx_bandwidth(&mut self, rx_bw_khz: f32) -> Result<()> {
        if let Some(br) = self.core.settings.bit_rate_kbps {
            if br >= 2000.0 * rx_bw_khz {
                return Err(RadioError::InvalidBitRateBandwidthRatio {
                    bit_rate: br,
                    rx_bandwidth: rx_bw_khz,
                });
            }
        }
        let code = rx_bandwidth_code(rx_bw_khz).ok_or(RadioError::InvalidRxBandwidth(rx_bw_khz))?;
        in_standby(self, |radio| {
            radio.core.module.set_register(REG_RX_BW, code)?;
            radio.core.module.set_register(REG_AFC_BW, code)?;
            radio.core.settings.bandwidth_khz = rx_bw_khz;
            Ok(())
        })
    }

    /// Frequency deviation in kHz; `deviation + bit_rate / 2` may not exceed 500.
    pub fn set_frequency_deviation(&mut self, dev_khz: f32) -> Result<()> {
        let br = self.core.settings.bit_rate_kbps.unwrap_or(0.0);
        if dev_khz < 0.0 || dev_khz + br / 2.0 > 500.0 {
            return Err(RadioError::InvalidFrequencyDeviation(dev_khz));
        }
        let raw = (f64::from(dev_khz) * f64::from(1u32 << DIV_EXPONENT) / 32_000.0) as u16 & 0x3FFF;
        in_standby(self, |radio| {
            let [msb, lsb] = raw.to_be_bytes();
            radio.core.module.set_register_field(REG_FDEV_MSB, msb, 5, 0)?;
            radio.core.module.set_register(REG_FDEV_LSB, lsb)?;
            radio.core.settings.frequency_deviation_khz = Some(dev_khz);
            Ok(())
        })
    }

    /// 1 to 8 non-zero bytes, tolerating up to `max_errors` (0..=7) bit errors.
    pub fn set_sync_word(&mut self, sync_word: &[u8], max_errors: u8) -> Result<()> {
        let sw = SyncWord::new(sync_word)?;
        if sync_word.contains(&0) {
            return Err(RadioError::InvalidSyncWord(
                "sync word bytes must be non-zero".into(),
            ));
        }
        if max_errors > 7 {
            return Err(RadioError::InvalidSyncWord(format!(
                "{} tolerated bit errors, at most 7",
                max_errors
            )));
        }
        let sync_config = SYNC_ON | ((sw.len() as u8 - 1) << 3) | max_errors;
        in_standby(self, |radio| {
            radio.core.module.set_register(REG_SYNC_CONFIG, sync_config)?;
            radio.core.module.burst_write(REG_SYNC_VALUE_1, sw.as_bytes())?;
            radio.core.settings.sync_word = sw;
            Ok(())
        })
    }

    /// Preamble length in bits, a multiple of 8.
    pub fn set_preamble_length(&mut self, bits: u16) -> Result<()> {
        if bits % 8 != 0 {
            return Err(RadioError::InvalidPreambleLength(bits));
        }
        let [msb, lsb] = (bits / 8).to_be_bytes();
        in_standby(self, |radio| {
            radio.core.module.set_register(REG_PREAMBLE_MSB, msb)?;
            radio.core.module.set_register(REG_PREAMBLE_LSB, lsb)?;
            radio.core.settings.preamble_length = bits;
            Ok(())
        })
    }

    pub fn variable_packet_length_mode(&mut self, max_len: u8) -> Result<()> {
        self.set_packet_format(PACKET_FORMAT_VARIABLE, max_len)?;
        self.core.settings.packet_length = PacketLengthMode::Variable { max: max_len };
        Ok(())
    }

    pub fn fixed_packet_length_mode(&mut self, len: u8) -> Result<()> {
        if len == 0 {
            return Err(RadioError::PacketTooLong {
                len: 0,
                max: FIFO_SIZE,
            });
        }
        self.set_packet_format(PACKET_FORMAT_FIXED, len)?;
        self.core.settings.packet_length = PacketLengthMode::Fixed { len };
        Ok(())
    }

    fn set_packet_format(&mut self, format: u8, len: u8) -> Result<()> {
        if usize::from(len) > FIFO_SIZE {
            return Err(RadioError::PacketTooLong {
                len: usize::from(len),
                max: FIFO_SIZE,
            });
        }
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_PACKET_CONFIG_1, format, 7, 7)?;
            radio.core.module.set_register(REG_PAYLOAD_LENGTH, len)
        })
    }

    pub fn set_crc(&mut self, enabled: bool) -> Result<()> {
        let value = if enabled { CRC_ON } else { CRC_OFF };
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_PACKET_CONFIG_1, value, 4, 4)?;
            radio.core.settings.crc_enabled = enabled;
            Ok(())
        })
    }

    pub fn set_ook(&mut self, enabled: bool) -> Result<()> {
        let value = if enabled { MODULATION_OOK } else { MODULATION_FSK };
        in_standby(self, |radio| {
            radio.core.module.set_register_field(REG_DATA_MODUL, value, 4, 3)?;
            radio.ook = enabled;
            Ok(())
        })
    }

    /// Accept only packets addressed to `node` (or the broadcast address, if set).
    pub fn set_node_address(&mut self, node: u8) -> Result<()> {
        in_standby(self, |radio| {
            let m = &mut radio.core.module;
            m.set_register_field(REG_PACKET_CONFIG_1, ADDRESS_FILTERING_NODE, 2, 1)?;
            m.set_register(REG_NODE_ADRS, node)?;
            radio.address_filtering = true;
            Ok(())
        })
    }

    pub fn set_broadcast_address(&mut self, broadcast: u8) -> Result<()> {
        in_standby(self, |radio| {
            let m = &mut radio.core.module;
            m.set_register_field(REG_PACKET_CONFIG_1, ADDRESS_FILTERING_NODE_BROADCAST, 2, 1)?;
            m.set_register(REG_BROADCAST_ADRS, broadcast)?;
            radio.address_filtering = true;
            Ok(())
        })
    }

    pub fn disable_address_filtering(&mut self) -> Result<()> {
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_PACKET_CONFIG_1, ADDRESS_FILTERING_OFF, 2, 1)?;
            radio.address_filtering = false;
            Ok(())
        })
    }

    pub fn set_aes_key(&mut self, key: &[u8; 16]) -> Result<()> {
        in_standby(self, |radio| radio.core.module.burst_write(REG_AES_KEY_1, key))
    }

    pub fn set_aes(&mut self, enabled: bool) -> Result<()> {
        let value = if enabled { AES_ON } else { AES_OFF };
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_PACKET_CONFIG_2, value, 0, 0)
        })
    }

    /// Return to packet mode after `transmit_direct`/`receive_direct`.
    pub fn packet_mode(&mut self) -> Result<()> {
        self.core
            .module
            .set_register_field(REG_DATA_MODUL, DATA_MODE_PACKET, 6, 5)
    }

    fn direct_mode(&mut self) -> Result<()> {
        self.standby()?;
        let m = &mut self.core.module;
        m.set_register_field(REG_DIO_MAPPING_1, DIO1_CONT_DCLK | DIO2_CONT_DATA, 5, 2)?;
        m.set_register_field(REG_DATA_MODUL, DATA_MODE_CONTINUOUS_SYNC, 6, 5)
    }

    fn set_pa_test_registers(&mut self, boost: bool) -> Result<()> {
        let (pa1, pa2) = if boost {
            (TEST_PA1_BOOST, TEST_PA2_BOOST)
        } else {
            (TEST_PA1_NORMAL, TEST_PA2_NORMAL)
        };
        self.core.module.set_register(REG_TEST_PA1, pa1)?;
        self.core.module.set_register(REG_TEST_PA2, pa2)
    }

    // ----- packet I/O -----

    /// Transmit `data`, prefixed with `addr` when address filtering is enabled.
    pub fn start_transmit_to(&mut self, data: &[u8], addr: u8) -> Result<()> {
        let addr_len = usize::from(self.address_filtering);
        let max = FIFO_SIZE - addr_len;
        if data.len() > max {
            return Err(RadioError::PacketTooLong {
                len: data.len(),
                max,
            });
        }
        let fixed = match self.core.settings.packet_length {
            PacketLengthMode::Fixed { len } => {
                let len = usize::from(len);
                if data.len() + addr_len > len {
                    return Err(RadioError::PacketTooLong {
                        len: data.len(),
                        max: len - addr_len.min(len),
                    });
                }
                Some(len)
            }
            PacketLengthMode::Variable { .. } => None,
        };

        self.standby()?;
        self.packet_mode()?;
        self.core
            .module
            .set_register_field(REG_DIO_MAPPING_1, DIO0_PACKET_SENT, 7, 6)?;
        self.clear_irq_flags();

        let m = &mut self.core.module;
        if fixed.is_none() {
            m.write_register(REG_FIFO, (data.len() + addr_len) as u8);
        }
        if self.address_filtering {
            m.write_register(REG_FIFO, addr);
        }
        m.burst_write(REG_FIFO, data)?;
        if let Some(len) = fixed {
            for _ in data.len() + addr_len..len {
                m.write_register(REG_FIFO, 0x00);
            }
        }

        let boost = self.high_power && self.core.settings.output_power_dbm > 17;
        self.set_pa_test_registers(boost)?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Tx);
        self.set_mode(MODE_TX, RadioState::Transmit)
    }

    /// Arm reception; with `timeout` DIO1 reports the hardware RX timeout.
    pub fn start_receive_with_timeout(&mut self, timeout: bool) -> Result<()> {
        self.standby()?;
        self.packet_mode()?;
        let m = &mut self.core.module;
        if timeout {
            m.set_register_field(REG_DIO_MAPPING_1, DIO0_PAYLOAD_READY | DIO1_TIMEOUT, 7, 4)?;
            m.set_register(REG_RX_TIMEOUT_1, RX_TIMEOUT_MAX)?;
            m.set_register(REG_RX_TIMEOUT_2, RX_TIMEOUT_MAX)?;
        } else {
            m.set_register_field(REG_DIO_MAPPING_1, DIO0_PAYLOAD_READY, 7, 6)?;
            m.set_register(REG_RX_TIMEOUT_1, RX_TIMEOUT_OFF)?;
            m.set_register(REG_RX_TIMEOUT_2, RX_TIMEOUT_OFF)?;
        }
        self.clear_irq_flags();
        self.packet_length = None;
        self.set_pa_test_registers(false)?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Rx);
        let state = if timeout {
            RadioState::Receive
        } else {
            RadioState::ReceiveContinuous
        };
        self.set_mode(MODE_RX, state)
    }

    fn packet_bits(&self, payload_len: usize) -> usize {
        let preamble = usize::from(self.core.settings.preamble_length);
        preamble + 8 * (payload_len + PACKET_OVERHEAD_BYTES)
    }

    fn bit_rate(&self) -> f32 {
        self.core.settings.bit_rate_kbps.unwrap_or(1.2)
    }

    fn tx_budget_us(&self, len: usize) -> u64 {
        TX_BASE_BUDGET_US + 5 * fsk_airtime_us(self.packet_bits(len), self.bit_rate())
    }

    /// Hardware timeout (two 255 x 16-bit windows) plus a worst-case packet, with margin
    fn rx_budget_us(&self) -> u64 {
        let bits = 2 * 255 * 16 + self.packet_bits(FIFO_SIZE);
        TX_BASE_BUDGET_US + fsk_airtime_us(bits, self.bit_rate()) * 3 / 2
    }

    // ----- measurements -----

    /// Chip temperature in °C, corrected by [`Rf69::set_ambient_temperature`].
    pub fn temperature(&mut self) -> Result<i16> {
        self.standby()?;
        // the start bit self-clears, so it cannot go through a verified write
        let temp_1 = self.core.module.read_register(REG_TEMP_1);
        self.core
            .module
            .write_register(REG_TEMP_1, temp_1 | TEMP_MEAS_START);
        let start = self.core.module.millis();
        while self.core.module.get_register_field(REG_TEMP_1, 2, 2)? == TEMP_MEAS_RUNNING {
            if self.core.module.millis().saturating_sub(start) >= MEASUREMENT_TIMEOUT_MS {
                log::warn!("RF69: temperature measurement did not finish");
                return Err(RadioError::MeasurementTimeout("temperature"));
            }
            self.core.module.delay_us(10);
        }
        let raw = self.core.module.read_register(REG_TEMP_2) as i8;
        Ok(-(i16::from(raw) + self.temperature_offset))
    }

    /// Calibrate the temperature sensor against a known ambient temperature.
    pub fn set_ambient_temperature(&mut self, ambient_c: i16) -> Result<()> {
        self.temperature_offset = self.temperature()? - ambient_c;
        Ok(())
    }

    /// One-shot RSSI measurement while receiving, dBm
    pub fn instant_rssi(&mut self) -> Result<f32> {
        self.core.module.write_register(REG_RSSI_CONFIG, RSSI_START);
        let start = self.core.module.millis();
        while self.core.module.read_register(REG_RSSI_CONFIG) & RSSI_DONE == 0 {
            if self.core.module.millis().saturating_sub(start) >= MEASUREMENT_TIMEOUT_MS {
                return Err(RadioError::MeasurementTimeout("rssi"));
            }
            self.core.module.yield_now();
        }
        Ok(-f32::from(self.core.module.read_register(REG_RSSI_VALUE)) / 2.0)
    }
}

impl<H: Hal> PhysicalLayer for Rf69<H> {
    type Config = Rf69Config;

    fn begin(&mut self, config: &Rf69Config) -> Result<()> {
        self.core.module.init();
        self.core.attach_irq();
        self.reset();
        self.core
            .find_chip(|m| m.read_register(REG_VERSION) == CHIP_VERSION)?;

        let snapshot = self.core.settings.clone();
        if let Err(err) = self.apply(config) {
            log::warn!("RF69: begin failed: {}", err);
            self.core.settings = snapshot;
            return Err(err);
        }
        self.core.ready = true;
        log::info!(
            "RF69 ready at {} MHz, {} kbps",
            config.frequency_mhz,
            config.bit_rate_kbps
        );
        Ok(())
    }

    fn reset(&mut self) {
        let rst = self.core.module.pins().rst;
        let m = &mut self.core.module;
        m.pin_mode(rst, PinMode::Output);
        m.digital_write(rst, Level::High);
        m.delay(1);
        m.digital_write(rst, Level::Low);
        m.delay(10);
    }

    fn sleep(&mut self) -> Result<()> {
        self.core.module.set_rf_switch_state(RfSwitchMode::Idle);
        self.set_mode(MODE_SLEEP, RadioState::Sleep)
    }

    fn standby(&mut self) -> Result<()> {
        self.core.module.set_rf_switch_state(RfSwitchMode::Idle);
        self.set_mode(MODE_STANDBY, RadioState::Standby)
    }

    fn state(&self) -> RadioState {
        self.core.state
    }

    fn settings(&self) -> Option<&LinkSettings> {
        self.core.settings()
    }

    fn set_frequency(&mut self, freq_mhz: f32) -> Result<()> {
        let frf = validate_frequency(freq_mhz)?;
        in_standby(self, |radio| {
            radio
                .core
                .module
                .burst_write(REG_FRF_MSB, &frf.to_be_bytes()[1..])?;
            radio.core.settings.frequency_mhz = freq_mhz;
            Ok(())
        })
    }

    fn set_output_power(&mut self, power_dbm: i8) -> Result<()> {
        let (pa_level, boost) = power_setting(power_dbm, self.high_power)?;
        in_standby(self, |radio| {
            let m = &mut radio.core.module;
            m.set_register(REG_PA_LEVEL, pa_level)?;
            let ocp = if boost {
                OCP_OFF | OCP_TRIM_MAX
            } else {
                OCP_ON | OCP_TRIM_95_MA
            };
            m.set_register(REG_OCP, ocp)?;
            radio.core.settings.output_power_dbm = power_dbm;
            Ok(())
        })
    }

    fn set_data_shaping(&mut self, shaping: DataShaping) -> Result<()> {
        let value = match (shaping, self.ook) {
            (DataShaping::None, _) => SHAPING_NONE,
            (_, true) => return Err(RadioError::InvalidDataShaping),
            (DataShaping::Gaussian0_3, false) => SHAPING_BT_0_3,
            (DataShaping::Gaussian0_5, false) => SHAPING_BT_0_5,
            (DataShaping::Gaussian1_0, false) => SHAPING_BT_1_0,
        };
        in_standby(self, |radio| {
            radio.core.module.set_register_field(REG_DATA_MODUL, value, 1, 0)?;
            radio.core.settings.shaping = shaping;
            Ok(())
        })
    }

    fn set_encoding(&mut self, encoding: Encoding) -> Result<()> {
        let value = match encoding {
            Encoding::Nrz => DC_FREE_NONE,
            Encoding::Manchester => DC_FREE_MANCHESTER,
            Encoding::Whitening => DC_FREE_WHITENING,
        };
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_PACKET_CONFIG_1, value, 6, 5)?;
            radio.core.settings.encoding = encoding;
            Ok(())
        })
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<()> {
        self.start_transmit_to(data, 0x00)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        let budget = self.tx_budget_us(data.len());
        let start = self.core.module.micros();
        self.start_transmit(data)?;

        let outcome = self.core.wait_irq(budget, false);
        let elapsed = self.core.module.micros().saturating_sub(start);
        self.standby()?;
        self.clear_irq_flags();
        match outcome {
            WaitOutcome::Done => {
                self.core.record_data_rate(data.len(), elapsed);
                Ok(())
            }
            _ => {
                log::warn!("RF69: transmit timed out after {} us", elapsed);
                Err(RadioError::TxTimeout)
            }
        }
    }

    fn start_receive(&mut self) -> Result<()> {
        self.start_receive_with_timeout(false)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.start_receive_with_timeout(true)?;
        let budget = self.rx_budget_us();
        match self.core.wait_irq(budget, true) {
            WaitOutcome::Done => self.read_data(buf),
            outcome => {
                self.standby()?;
                self.clear_irq_flags();
                log::warn!("RF69: receive timed out ({:?})", outcome);
                Err(RadioError::RxTimeout)
            }
        }
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let flags = self.core.module.read_register(REG_IRQ_FLAGS_2);
        self.standby()?;

        let mut len = self.packet_length()?;
        if len > FIFO_SIZE {
            self.clear_irq_flags();
            self.packet_length = None;
            return Err(RadioError::MalformedResponse(format!(
                "packet length {} exceeds FIFO",
                len
            )));
        }
        if self.address_filtering && len > 0 {
            self.core.module.read_register(REG_FIFO);
            len -= 1;
        }
        let n = len.min(buf.len());
        self.core.module.burst_read(REG_FIFO, &mut buf[..n])?;
        self.last_rssi = -f32::from(self.core.module.read_register(REG_RSSI_VALUE)) / 2.0;
        self.packet_length = None;
        self.clear_irq_flags();

        if self.core.settings.crc_enabled && flags & IRQ_CRC_OK == 0 {
            log::debug!("RF69: CRC error in {}-byte packet", len);
            return Err(RadioError::CrcMismatch);
        }
        Ok(n)
    }

    fn packet_length(&mut self) -> Result<usize> {
        if let Some(len) = self.packet_length {
            return Ok(len);
        }
        let len = match self.core.settings.packet_length {
            PacketLengthMode::Variable { .. } => {
                usize::from(self.core.module.read_register(REG_FIFO))
            }
            PacketLengthMode::Fixed { len } => usize::from(len),
        };
        self.packet_length = Some(len);
        Ok(len)
    }

    fn rssi(&mut self) -> f32 {
        self.last_rssi
    }

    fn random_byte(&mut self) -> Result<u8> {
        self.set_mode(MODE_RX, RadioState::Receive)?;
        self.core.module.delay(10);
        let mut value = 0u8;
        for bit in 0..8 {
            value |= (self.core.module.read_register(REG_RSSI_VALUE) & 0x01) << bit;
        }
        self.standby()?;
        Ok(value)
    }

    fn set_irq_action(&mut self, action: InterruptHandler) {
        self.core.attach_irq_action(action);
    }

    fn clear_irq_action(&mut self) {
        self.core.attach_irq();
    }

    fn transmit_direct(&mut self, frf: Option<u32>) -> Result<()> {
        self.core.module.set_rf_switch_state(RfSwitchMode::Tx);
        if let Some(frf) = frf {
            self.core
                .module
                .burst_write(REG_FRF_MSB, &frf.to_be_bytes()[1..])?;
            return self.set_mode(MODE_TX, RadioState::DirectTransmit);
        }
        self.direct_mode()?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Tx);
        self.set_mode(MODE_TX, RadioState::DirectTransmit)
    }

    fn receive_direct(&mut self) -> Result<()> {
        self.direct_mode()?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Rx);
        self.set_mode(MODE_RX, RadioState::DirectReceive)
    }

    fn start_frequency_synthesis(&mut self) -> Result<()> {
        self.set_mode(MODE_FS, RadioState::FrequencySynthesis)
    }

    fn freq_step(&self) -> f32 {
        FREQ_STEP_HZ
    }

    fn data_rate(&self) -> f32 {
        self.core.data_rate
    }

    fn max_packet_length(&self) -> usize {
        FIFO_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_bands() {
        assert_eq!(validate_frequency(434.0).unwrap(), 0x6C_8000);
        assert_eq!(validate_frequency(868.0).unwrap(), 0xD9_0000);
        assert!(validate_frequency(431.0).is_err());
        assert!(validate_frequency(360.0).is_err());
        assert!(validate_frequency(1020.0).is_err());
    }

    #[test]
    fn test_rx_bandwidth_table() {
        assert_eq!(rx_bandwidth_code(125.0), Some(0x42));
        assert_eq!(rx_bandwidth_code(2.6), Some(0x57));
        assert_eq!(rx_bandwidth_code(500.0), Some(0x40));
        assert_eq!(rx_bandwidth_code(120.0), None);
    }

    #[test]
    fn test_power_encoding() {
        assert_eq!(power_setting(10, false).unwrap(), (0x9C, false));
        assert_eq!(power_setting(-18, false).unwrap(), (0x80, false));
        assert!(power_setting(14, false).is_err());
        assert_eq!(power_setting(13, true).unwrap(), (0x5F, false));
        assert_eq!(power_setting(17, true).unwrap(), (0x7F, false));
        assert_eq!(power_setting(20, true).unwrap(), (0x7F, true));
        assert!(power_setting(-3, true).is_err());
        assert!(power_setting(21, true).is_err());
    }
}

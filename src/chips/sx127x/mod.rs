//! # SX127x LoRa and FSK/OOK Transceiver Driver
//!
//! Driver for the Semtech SX1276/77/78/79 family over the register protocol. The
//! variants share one register map and differ in their frequency range and
//! supported spreading factors ([`Sx127xVariant`]).
//!
//! [`PhysicalLayer::begin`] configures the LoRa modem and [`Sx127x::begin_fsk`] the
//! FSK/OOK modem ([`fsk`]). Operations shared by both modems dispatch on the active
//! one.
//!
//! In LoRa mode DIO0 signals TxDone, RxDone or CadDone depending on the operation;
//! DIO1 signals RxTimeout during single reception and CadDetected during a channel
//! scan. Low data rate optimization is managed automatically: it is enabled
//! whenever the symbol duration reaches 16 ms.

pub mod fsk;
pub mod registers;

use self::registers::*;
use super::{lora_symbol_us, ChipCore, LoraAirtime, WaitOutcome};
use crate::config::Sx127xConfig;
use crate::error::{RadioError, Result};
use crate::hal::{Hal, InterruptHandler, Level, PinMode};
use crate::module::{Module, RfSwitchMode};
use crate::phy::{
    in_standby, ChannelScan, DataShaping, Encoding, LinkSettings, Modem, PacketLengthMode,
    PhysicalLayer, RadioState, SyncWord,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Synthesizer step, Hz
pub const FREQ_STEP_HZ: f32 = 61.035_156;

/// LoRa bandwidths (kHz) in register-code order
const BANDWIDTHS: [f32; 10] = [7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125.0, 250.0, 500.0];

/// Symbol duration from which low data rate optimization is required, µs
const LDRO_SYMBOL_US: f32 = 16_000.0;

/// Fixed allowance on top of the CAD window, µs
const CAD_BASE_BUDGET_US: u64 = 5_000;

/// Chip variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Sx127xVariant {
    Sx1276,
    Sx1277,
    #[default]
    Sx1278,
    Sx1279,
}

impl Sx127xVariant {
    /// Carrier range, MHz (inclusive)
    pub fn frequency_range(self) -> RangeInclusive<f32> {
        match self {
            Sx127xVariant::Sx1276 | Sx127xVariant::Sx1277 => 137.0..=1020.0,
            Sx127xVariant::Sx1278 => 137.0..=525.0,
            Sx127xVariant::Sx1279 => 137.0..=960.0,
        }
    }

    pub fn spreading_factors(self) -> RangeInclusive<u8> {
        match self {
            Sx127xVariant::Sx1277 => 6..=9,
            _ => 6..=12,
        }
    }
}

impl fmt::Display for Sx127xVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sx127xVariant::Sx1276 => "SX1276",
            Sx127xVariant::Sx1277 => "SX1277",
            Sx127xVariant::Sx1278 => "SX1278",
            Sx127xVariant::Sx1279 => "SX1279",
        };
        f.write_str(name)
    }
}

/// MODEM_CONFIG_1 bits 7-4 for `bw_khz`
pub(crate) fn bandwidth_code(bw_khz: f32) -> Option<u8> {
    BANDWIDTHS
        .iter()
        .position(|&bw| (bw - bw_khz).abs() < 0.001)
        .map(|idx| (idx as u8) << 4)
}

/// (PA_CONFIG, PA_DAC) for `power_dbm` on the RFO or PA_BOOST output
pub(crate) fn power_setting(power_dbm: i8, use_rfo: bool) -> Result<(u8, u8)> {
    match (use_rfo, power_dbm) {
        (true, -3..=-1) => Ok((PA_SELECT_RFO | LOW_POWER | (power_dbm + 3) as u8, PA_BOOST_OFF)),
        (true, 0..=15) => Ok((PA_SELECT_RFO | MAX_POWER | power_dbm as u8, PA_BOOST_OFF)),
        (false, 2..=17) => Ok((
            PA_SELECT_BOOST | MAX_POWER | (power_dbm - 2) as u8,
            PA_BOOST_OFF,
        )),
        (false, 20) => Ok((PA_SELECT_BOOST | MAX_POWER | OUTPUT_POWER_MAX, PA_BOOST_ON)),
        _ => Err(RadioError::InvalidOutputPower(power_dbm)),
    }
}

/// OCP register value for `limit_ma`; 0 disables the protection
pub(crate) fn ocp_setting(limit_ma: u8) -> Result<u8> {
    let ma = u16::from(limit_ma);
    match ma {
        0 => Ok(OCP_OFF),
        45..=120 => Ok(OCP_ON | ((ma - 45) / 5) as u8),
        121..=240 => Ok(OCP_ON | ((ma + 30) / 10) as u8),
        _ => Err(RadioError::InvalidCurrentLimit(f32::from(limit_ma))),
    }
}

fn pulse_reset<H: Hal>(module: &mut Module<H>) {
    let rst = module.pins().rst;
    module.pin_mode(rst, PinMode::Output);
    module.digital_write(rst, Level::Low);
    module.delay(1);
    module.digital_write(rst, Level::High);
    module.delay(5);
}

/// SX127x driver
pub struct Sx127x<H: Hal> {
    core: ChipCore<H>,
    variant: Sx127xVariant,
    use_rfo: bool,
    explicit_header: bool,
    implicit_len: u8,
    ook: bool,
    address_filtering: bool,
    fsk_packet_len: Option<usize>,
}

impl<H: Hal> Sx127x<H> {
    pub fn new(module: Module<H>, variant: Sx127xVariant) -> Self {
        Self {
            core: ChipCore::new(module, "SX127x"),
            variant,
            use_rfo: false,
            explicit_header: true,
            implicit_len: u8::MAX,
            ook: false,
            address_filtering: false,
            fsk_packet_len: None,
        }
    }

    pub fn variant(&self) -> Sx127xVariant {
        self.variant
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
            .set_register_field_checked(REG_OP_MODE, mode, 2, 0, 0b0000_0111)?;
        self.core.set_state(state);
        Ok(())
    }

    /// Modem the chip is configured for
    pub fn modem(&self) -> Modem {
        self.core.settings.modem
    }

    fn clear_irq_flags(&mut self) {
        let m = &mut self.core.module;
        match self.core.settings.modem {
            Modem::Lora => m.write_register(REG_IRQ_FLAGS, 0xFF),
            Modem::Fsk => {
                m.write_register(REG_IRQ_FLAGS_1, 0xFF);
                m.write_register(REG_IRQ_FLAGS_2, 0xFF);
            }
        }
        self.core.pending.clear();
    }

    fn config(&mut self) -> Result<()> {
        // LoRa mode can only be selected from SLEEP
        self.set_mode(MODE_SLEEP, RadioState::Sleep)?;
        self.core.module.set_register_field(REG_OP_MODE, LORA, 7, 7)?;
        self.set_mode(MODE_STANDBY, RadioState::Standby)?;
        self.core.settings.modem = Modem::Lora;

        let m = &mut self.core.module;
        m.set_register(REG_HOP_PERIOD, HOP_PERIOD_OFF)?;
        m.set_register(REG_SYMB_TIMEOUT_LSB, RX_TIMEOUT_SYMBOLS)?;
        m.set_register(REG_MAX_PAYLOAD_LENGTH, FIFO_SIZE as u8)?;
        m.set_register_field(REG_MODEM_CONFIG_2, TX_MODE_SINGLE, 3, 3)?;

        let settings = &mut self.core.settings;
        settings.bit_rate_kbps = None;
        settings.frequency_deviation_khz = None;
        settings.shaping = DataShaping::None;
        settings.encoding = Encoding::Nrz;
        settings.packet_length = PacketLengthMode::Variable {
            max: FIFO_SIZE as u8,
        };
        self.explicit_header = true;
        self.ook = false;
        self.address_filtering = false;
        Ok(())
    }

    fn apply(&mut self, config: &Sx127xConfig) -> Result<()> {
        self.variant = config.variant;
        self.config()?;
        self.set_sync_word(config.sync_word)?;
        self.set_current_limit(config.current_limit_ma)?;
        self.set_preamble_length(config.preamble_length)?;
        self.set_bandwidth(config.bandwidth_khz)?;
        self.set_frequency(config.frequency_mhz)?;
        self.set_spreading_factor(config.spreading_factor)?;
        self.set_coding_rate(config.coding_rate)?;
        self.use_rfo = config.use_rfo;
        self.set_output_power(config.output_power_dbm)?;
        self.set_gain(config.gain)?;
        self.set_crc(config.crc)?;
        if config.explicit_header && config.spreading_factor != 6 {
            self.explicit_header()?;
        } else {
            self.implicit_header(config.implicit_length)?;
        }
        self.standby()
    }

    fn airtime(&self) -> LoraAirtime {
        let s = &self.core.settings;
        let sf = s.spreading_factor.unwrap_or(9);
        LoraAirtime {
            sf,
            bandwidth_khz: s.bandwidth_khz,
            coding_rate: s.coding_rate.unwrap_or(7),
            preamble: s.preamble_length,
            explicit_header: self.explicit_header,
            crc: s.crc_enabled,
            low_data_rate: lora_symbol_us(sf, s.bandwidth_khz) >= LDRO_SYMBOL_US,
        }
    }

    fn symbol_us(&self) -> f32 {
        let s = &self.core.settings;
        lora_symbol_us(s.spreading_factor.unwrap_or(9), s.bandwidth_khz)
    }

    /// Time on air of a `len`-byte packet with the current settings, µs
    pub fn time_on_air_us(&self, len: usize) -> u64 {
        match self.core.settings.modem {
            Modem::Lora => self.airtime().time_on_air_us(len),
            Modem::Fsk => self.fsk_time_on_air_us(len),
        }
    }

    fn update_low_data_rate_optimization(&mut self) -> Result<()> {
        if self.core.settings.bandwidth_khz <= 0.0 || self.core.settings.spreading_factor.is_none() {
            return Ok(());
        }
        let value = if self.symbol_us() >= LDRO_SYMBOL_US {
            LOW_DATA_RATE_OPT_ON
        } else {
            LOW_DATA_RATE_OPT_OFF
        };
        self.core
            .module
            .set_register_field(REG_MODEM_CONFIG_3, value, 3, 3)
    }

    // ----- link configuration -----

    pub fn set_bandwidth(&mut self, bw_khz: f32) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        let code = bandwidth_code(bw_khz).ok_or(RadioError::InvalidBandwidth(bw_khz))?;
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_MODEM_CONFIG_1, code, 7, 4)?;
            radio.core.settings.bandwidth_khz = bw_khz;
            radio.update_low_data_rate_optimization()
        })
    }

    /// Spreading factor; SF6 forces implicit header mode.
    pub fn set_spreading_factor(&mut self, sf: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        if !self.variant.spreading_factors().contains(&sf) {
            return Err(RadioError::InvalidSpreadingFactor(sf));
        }
        let crc = if self.core.settings.crc_enabled {
            RX_CRC_ON
        } else {
            RX_CRC_OFF
        };
        in_standby(self, |radio| {
            let m = &mut radio.core.module;
            m.set_register_field(REG_MODEM_CONFIG_2, (sf << 4) | TX_MODE_SINGLE | crc, 7, 2)?;
            if sf == 6 {
                m.set_register_field(REG_DETECT_OPTIMIZE, DETECT_OPTIMIZE_SF_6, 2, 0)?;
                m.set_register(REG_DETECTION_THRESHOLD, DETECTION_THRESHOLD_SF_6)?;
            } else {
                m.set_register_field(REG_DETECT_OPTIMIZE, DETECT_OPTIMIZE_SF_7_12, 2, 0)?;
                m.set_register(REG_DETECTION_THRESHOLD, DETECTION_THRESHOLD_SF_7_12)?;
            }
            radio.core.settings.spreading_factor = Some(sf);
            if sf == 6 && radio.explicit_header {
                let len = radio.implicit_len;
                radio.write_header_mode(false, len)?;
            }
            radio.update_low_data_rate_optimization()
        })
    }

    /// Coding rate 4/`cr`, with `cr` in 5..=8.
    pub fn set_coding_rate(&mut self, cr: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        if !(5..=8).contains(&cr) {
            return Err(RadioError::InvalidCodingRate(cr));
        }
        in_standby(self, |radio| {
            radio
                .core
                .module
                .set_register_field(REG_MODEM_CONFIG_1, (cr - 4) << 1, 3, 1)?;
            radio.core.settings.coding_rate = Some(cr);
            Ok(())
        })
    }

    /// LoRa sync word; see [`Sx127x::set_fsk_sync_word`] for the FSK modem.
    pub fn set_sync_word(&mut self, sync_word: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        let sw = SyncWord::new(&[sync_word])?;
        in_standby(self, |radio| {
            radio.core.module.set_register(REG_SYNC_WORD, sync_word)?;
            radio.core.settings.sync_word = sw;
            Ok(())
        })
    }

    /// Overcurrent protection limit, 45 to 240 mA; 0 disables it.
    pub fn set_current_limit(&mut self, limit_ma: u8) -> Result<()> {
        let raw = ocp_setting(limit_ma)?;
        in_standby(self, |radio| {
            radio.core.module.set_register_field(REG_OCP, raw, 5, 0)
        })
    }

    /// Preamble length: LoRa symbols, at least 6, or FSK bits, a multiple of 8.
    pub fn set_preamble_length(&mut self, length: u16) -> Result<()> {
        let (reg_msb, raw) = match self.core.settings.modem {
            Modem::Lora if length < 6 => return Err(RadioError::InvalidPreambleLength(length)),
            Modem::Lora => (REG_PREAMBLE_MSB, length),
            Modem::Fsk if length % 8 != 0 => {
                return Err(RadioError::InvalidPreambleLength(length))
            }
            Modem::Fsk => (REG_PREAMBLE_MSB_FSK, length / 8),
        };
        let [msb, lsb] = raw.to_be_bytes();
        in_standby(self, |radio| {
            radio.core.module.set_register(reg_msb, msb)?;
            radio.core.module.set_register(reg_msb + 1, lsb)?;
            radio.core.settings.preamble_length = length;
            Ok(())
        })
    }

    /// LNA gain 1 (highest) to 6 (lowest); 0 hands gain control to the AGC.
    pub fn set_gain(&mut self, gain: u8) -> Result<()> {
        if gain > 6 {
            return Err(RadioError::InvalidGain(gain));
        }
        let (agc_reg, agc_bit, agc_on, agc_off) = match self.core.settings.modem {
            Modem::Lora => (REG_MODEM_CONFIG_3, 2, AGC_AUTO_ON, AGC_AUTO_OFF),
            Modem::Fsk => (REG_RX_CONFIG, 3, RX_AGC_AUTO_ON, RX_AGC_AUTO_OFF),
        };
        in_standby(self, |radio| {
            let m = &mut radio.core.module;
            if gain == 0 {
                m.set_register_field(agc_reg, agc_on, agc_bit, agc_bit)
            } else {
                m.set_register_field(agc_reg, agc_off, agc_bit, agc_bit)?;
                m.set_register(REG_LNA, (gain << 5) | LNA_BOOST_HF_ON)
            }
        })
    }

    pub fn set_crc(&mut self, enabled: bool) -> Result<()> {
        let (reg, bit, value) = match (self.core.settings.modem, enabled) {
            (Modem::Lora, true) => (REG_MODEM_CONFIG_2, 2, RX_CRC_ON),
            (Modem::Lora, false) => (REG_MODEM_CONFIG_2, 2, RX_CRC_OFF),
            (Modem::Fsk, true) => (REG_PACKET_CONFIG_1, 4, CRC_ON),
            (Modem::Fsk, false) => (REG_PACKET_CONFIG_1, 4, CRC_OFF),
        };
        in_standby(self, |radio| {
            radio.core.module.set_register_field(reg, value, bit, bit)?;
            radio.core.settings.crc_enabled = enabled;
            Ok(())
        })
    }

    /// Header-less packets of exactly `len` bytes.
    pub fn implicit_header(&mut self, len: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        in_standby(self, |radio| radio.write_header_mode(false, len))
    }

    /// Not available at SF6, which requires implicit mode.
    pub fn explicit_header(&mut self) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        if self.core.settings.spreading_factor == Some(6) {
            return Err(RadioError::InvalidSpreadingFactor(6));
        }
        let len = self.implicit_len;
        in_standby(self, |radio| radio.write_header_mode(true, len))
    }

    fn write_header_mode(&mut self, explicit: bool, len: u8) -> Result<()> {
        let m = &mut self.core.module;
        if explicit {
            m.set_register_field(REG_MODEM_CONFIG_1, HEADER_EXPLICIT, 0, 0)?;
            self.core.settings.packet_length = PacketLengthMode::Variable {
                max: FIFO_SIZE as u8,
            };
        } else {
            m.set_register_field(REG_MODEM_CONFIG_1, HEADER_IMPLICIT, 0, 0)?;
            m.set_register(REG_PAYLOAD_LENGTH, len)?;
            self.core.settings.packet_length = PacketLengthMode::Fixed { len };
        }
        self.explicit_header = explicit;
        self.implicit_len = len;
        Ok(())
    }

    // ----- packet I/O -----

    /// Arm reception; single mode ends with RxDone or the symbol timeout on DIO1.
    pub fn start_receive_mode(&mut self, single: bool) -> Result<()> {
        if self.core.settings.modem == Modem::Fsk {
            return self.start_fsk_receive(single);
        }
        self.standby()?;
        let m = &mut self.core.module;
        m.set_register_field(REG_DIO_MAPPING_1, DIO0_RX_DONE | DIO1_RX_TIMEOUT, 7, 4)?;
        if !self.explicit_header {
            m.set_register(REG_PAYLOAD_LENGTH, self.implicit_len)?;
        }
        self.clear_irq_flags();
        let m = &mut self.core.module;
        m.set_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;
        m.set_register(REG_FIFO_ADDR_PTR, 0x00)?;
        m.set_rf_switch_state(RfSwitchMode::Rx);
        if single {
            self.set_mode(MODE_RXSINGLE, RadioState::Receive)
        } else {
            self.set_mode(MODE_RXCONTINUOUS, RadioState::ReceiveContinuous)
        }
    }

    fn tx_budget_us(&self, len: usize) -> u64 {
        match self.core.settings.modem {
            Modem::Lora => self.time_on_air_us(len) * 3 / 2,
            Modem::Fsk => self.fsk_tx_budget_us(len),
        }
    }

    /// LoRa: symbol timeout window plus a maximum-length packet, with margin
    fn rx_budget_us(&self) -> u64 {
        if self.core.settings.modem == Modem::Fsk {
            return self.fsk_rx_budget_us();
        }
        let window = (self.symbol_us() * f32::from(RX_TIMEOUT_SYMBOLS)) as u64;
        (window + self.time_on_air_us(FIFO_SIZE)) * 3 / 2
    }

    // ----- measurements -----

    /// SNR of the last received LoRa packet, dB; 0 in FSK mode
    pub fn snr(&mut self) -> f32 {
        if self.core.settings.modem == Modem::Fsk {
            return 0.0;
        }
        f32::from(self.core.module.read_register(REG_PKT_SNR_VALUE) as i8) / 4.0
    }

    fn rssi_offset(&self) -> f32 {
        if self.core.settings.frequency_mhz >= 868.0 {
            -157.0
        } else {
            -164.0
        }
    }

    /// Current RSSI while receiving, dBm
    pub fn instant_rssi(&mut self) -> f32 {
        if self.core.settings.modem == Modem::Fsk {
            return self.fsk_rssi();
        }
        self.rssi_offset() + f32::from(self.core.module.read_register(REG_RSSI_VALUE))
    }
}

impl<H: Hal> PhysicalLayer for Sx127x<H> {
    type Config = Sx127xConfig;

    fn begin(&mut self, config: &Sx127xConfig) -> Result<()> {
        self.core.module.init();
        self.core.attach_irq();
        self.core.find_chip(|m| {
            pulse_reset(m);
            m.read_register(REG_VERSION) == CHIP_VERSION
        })?;

        let snapshot = self.core.settings.clone();
        if let Err(err) = self.apply(config) {
            log::warn!("{}: begin failed: {}", config.variant, err);
            self.core.settings = snapshot;
            return Err(err);
        }
        self.core.ready = true;
        log::info!(
            "{} ready at {} MHz, SF{} / {} kHz",
            self.variant,
            config.frequency_mhz,
            config.spreading_factor,
            config.bandwidth_khz
        );
        Ok(())
    }

    fn reset(&mut self) {
        pulse_reset(&mut self.core.module);
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
        if !self.variant.frequency_range().contains(&freq_mhz) {
            return Err(RadioError::InvalidFrequency(freq_mhz));
        }
        let frf = (f64::from(freq_mhz) * f64::from(1u32 << DIV_EXPONENT)
            / f64::from(CRYSTAL_FREQ_MHZ)) as u32;
        in_standby(self, |radio| {
            radio
                .core
                .module
                .burst_write(REG_FRF_MSB, &frf.to_be_bytes()[1..])?;
            radio.core.settings.frequency_mhz = freq_mhz;
            Ok(())
        })
    }

    /// RFO: -3 to 15 dBm. PA_BOOST: 2 to 17 dBm, or 20 dBm with the high-power DAC.
    fn set_output_power(&mut self, power_dbm: i8) -> Result<()> {
        let (pa_config, pa_dac) = power_setting(power_dbm, self.use_rfo)?;
        in_standby(self, |radio| {
            let m = &mut radio.core.module;
            m.set_register(REG_PA_CONFIG, pa_config)?;
            m.set_register_field(REG_PA_DAC, pa_dac, 2, 0)?;
            radio.core.settings.output_power_dbm = power_dbm;
            Ok(())
        })
    }

    fn set_data_shaping(&mut self, shaping: DataShaping) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        self.set_fsk_shaping(shaping)
    }

    fn set_encoding(&mut self, encoding: Encoding) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        self.set_fsk_encoding(encoding)
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<()> {
        if self.core.settings.modem == Modem::Fsk {
            return self.start_transmit_to(data, 0x00);
        }
        if data.len() > FIFO_SIZE {
            return Err(RadioError::PacketTooLong {
                len: data.len(),
                max: FIFO_SIZE,
            });
        }
        self.standby()?;
        self.core
            .module
            .set_register_field(REG_DIO_MAPPING_1, DIO0_TX_DONE, 7, 6)?;
        self.clear_irq_flags();

        let m = &mut self.core.module;
        m.set_register(REG_PAYLOAD_LENGTH, data.len() as u8)?;
        m.set_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        m.set_register(REG_FIFO_ADDR_PTR, 0x00)?;
        m.burst_write(REG_FIFO, data)?;
        m.set_rf_switch_state(RfSwitchMode::Tx);
        self.set_mode(MODE_TX, RadioState::Transmit)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        let budget = self.tx_budget_us(data.len());
        let start = self.core.module.micros();
        self.start_transmit(data)?;

        let outcome = self.core.wait_irq(budget, false);
        let elapsed = self.core.module.micros().saturating_sub(start);
        self.standby()?;
        self.clear_irq_flags();
        if outcome != WaitOutcome::Done {
            log::warn!("{}: transmit timed out after {} us", self.variant, elapsed);
            return Err(RadioError::TxTimeout);
        }
        self.core.record_data_rate(data.len(), elapsed);
        Ok(())
    }

    fn start_receive(&mut self) -> Result<()> {
        self.start_receive_mode(false)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.start_receive_mode(true)?;
        let budget = self.rx_budget_us();
        match self.core.wait_irq(budget, true) {
            WaitOutcome::Done => self.read_data(buf),
            outcome => {
                self.standby()?;
                self.clear_irq_flags();
                log::warn!("{}: receive timed out ({:?})", self.variant, outcome);
                Err(RadioError::RxTimeout)
            }
        }
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.core.settings.modem == Modem::Fsk {
            return self.read_fsk_data(buf);
        }
        self.standby()?;
        let len = self.packet_length()?;

        let m = &mut self.core.module;
        let flags = m.read_register(REG_IRQ_FLAGS);
        let header_damaged = self.explicit_header
            && self.core.settings.crc_enabled
            && m.read_register(REG_HOP_CHANNEL) & CRC_ON_PAYLOAD == 0;

        let rx_addr = m.read_register(REG_FIFO_RX_CURRENT_ADDR);
        m.set_register(REG_FIFO_ADDR_PTR, rx_addr)?;
        let n = len.min(buf.len());
        m.burst_read(REG_FIFO, &mut buf[..n])?;
        self.clear_irq_flags();

        if header_damaged {
            log::debug!("{}: header reports no payload CRC", self.variant);
            return Err(RadioError::CrcMismatch);
        }
        if flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
            log::debug!("{}: CRC error in {}-byte packet", self.variant, len);
            return Err(RadioError::CrcMismatch);
        }
        Ok(n)
    }

    fn packet_length(&mut self) -> Result<usize> {
        if self.core.settings.modem == Modem::Fsk {
            return Ok(self.fsk_packet_length());
        }
        if self.explicit_header {
            Ok(usize::from(self.core.module.read_register(REG_RX_NB_BYTES)))
        } else {
            Ok(usize::from(self.implicit_len))
        }
    }

    /// LoRa: RSSI of the last packet, corrected by its SNR when below the noise
    /// floor. FSK: current RSSI.
    fn rssi(&mut self) -> f32 {
        if self.core.settings.modem == Modem::Fsk {
            return self.fsk_rssi();
        }
        let raw = f32::from(self.core.module.read_register(REG_PKT_RSSI_VALUE));
        let snr = self.snr();
        let rssi = self.rssi_offset() + raw;
        if snr < 0.0 {
            rssi + snr
        } else {
            rssi
        }
    }

    fn random_byte(&mut self) -> Result<u8> {
        if self.core.settings.modem == Modem::Fsk {
            return self.fsk_random_byte();
        }
        self.set_mode(MODE_RXCONTINUOUS, RadioState::ReceiveContinuous)?;
        self.core.module.delay(10);
        let mut value = 0u8;
        for bit in 0..8 {
            value |= (self.core.module.read_register(REG_RSSI_WIDEBAND) & 0x01) << bit;
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
        self.core.require_modem(Modem::Fsk)?;
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
        self.core.require_modem(Modem::Fsk)?;
        self.direct_mode()?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Rx);
        self.set_mode(MODE_FSK_RX, RadioState::DirectReceive)
    }

    fn start_frequency_synthesis(&mut self) -> Result<()> {
        self.set_mode(MODE_FSTX, RadioState::FrequencySynthesis)
    }

    fn scan_channel(&mut self) -> Result<ChannelScan> {
        self.core.require_modem(Modem::Lora)?;
        self.standby()?;
        self.core.module.set_register_field(
            REG_DIO_MAPPING_1,
            DIO0_CAD_DONE | DIO1_CAD_DETECTED,
            7,
            4,
        )?;
        self.clear_irq_flags();
        self.set_mode(MODE_CAD, RadioState::ChannelActivityDetect)?;

        let budget = CAD_BASE_BUDGET_US + (self.symbol_us() * 4.0) as u64;
        let outcome = self.core.wait_irq(budget, false);
        let gpio = self.core.module.pins().gpio;
        let detected = self.core.module.digital_read(gpio) == Level::High
            || self.core.module.read_register(REG_IRQ_FLAGS) & IRQ_CAD_DETECTED != 0;
        self.clear_irq_flags();
        self.standby()?;
        match outcome {
            WaitOutcome::Done if detected => Ok(ChannelScan::Detected),
            WaitOutcome::Done => Ok(ChannelScan::Free),
            _ => {
                log::warn!("{}: channel scan did not complete", self.variant);
                Err(RadioError::RxTimeout)
            }
        }
    }

    fn freq_step(&self) -> f32 {
        FREQ_STEP_HZ
    }

    fn data_rate(&self) -> f32 {
        self.core.data_rate
    }

    fn max_packet_length(&self) -> usize {
        match self.core.settings.modem {
            Modem::Lora => FIFO_SIZE,
            Modem::Fsk => FIFO_SIZE_FSK,
        }
    }
}

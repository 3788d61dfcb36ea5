//! # SX126x LoRa and GFSK Transceiver Driver
//!
//! Driver for the Semtech SX1262 over the command protocol. [`PhysicalLayer::begin`]
//! configures the LoRa modem and [`Sx126x::begin_fsk`] the GFSK modem ([`gfsk`]);
//! modem-specific setters return [`RadioError::WrongModem`] on the other one.
//!
//! Every command is an opcode frame followed by big-endian parameters; the chip
//! raises BUSY while it processes a command, and [`Module::command`] waits for BUSY
//! to drop before and after each transaction. Every byte the chip returns while
//! parameters are clocked in carries its status, decoded by
//! [`commands::parse_status`].
//!
//! Pin roles: `irq` is DIO1, `gpio` is BUSY. DIO2 can drive the antenna switch and
//! DIO3 can supply a TCXO.
//!
//! Unlike the register-protocol chips, reception uses the chip's own timer: a
//! single `receive` arms a hardware timeout of 100 LoRa symbols, or five airtimes of
//! a maximum-length GFSK packet, and the software budget only guards against a chip
//! that never raises DIO1.

pub mod commands;
pub mod gfsk;

use self::commands::*;
use self::gfsk::GfskFrame;
use super::{lora_symbol_us, ChipCore, WaitOutcome};
use crate::config::Sx126xConfig;
use crate::error::{RadioError, Result};
use crate::hal::{Hal, InterruptHandler, Level, PinMode};
use crate::module::{be_u16, CommandFrame, CommandProtocol, Module, RfSwitchMode};
use crate::phy::{
    in_standby, ChannelScan, DataShaping, Encoding, LinkSettings, Modem, PacketLengthMode,
    PhysicalLayer, RadioState, SyncWord,
};
use std::ops::RangeInclusive;

/// Synthesizer step, Hz (32 MHz / 2^25)
pub const FREQ_STEP_HZ: f32 = 0.953_674_3;

pub const FREQUENCY_RANGE_MHZ: RangeInclusive<f32> = 150.0..=960.0;
pub const OUTPUT_POWER_RANGE_DBM: RangeInclusive<i8> = -17..=22;
pub const SPREADING_FACTORS: RangeInclusive<u8> = 5..=12;
pub const CURRENT_LIMIT_MAX_MA: f32 = 140.0;

/// Packet buffer size; also the longest packet accepted
pub const MAX_PACKET_LENGTH: usize = 255;

/// Startup delay programmed with the TCXO supply, µs
pub const DEFAULT_TCXO_DELAY_US: u32 = 5_000;

/// Symbols of preamble the hardware timer waits for in a single `receive`
pub const RX_TIMEOUT_SYMBOLS: u32 = 100;

const LDRO_SYMBOL_US: f32 = 16_000.0;
const CAD_BASE_BUDGET_US: u64 = 5_000;

const PROTOCOL: CommandProtocol = CommandProtocol {
    status_bytes: 1,
    parse_status,
    frame_crc: None,
};

/// RST low for 1 ms, then wait for the chip to drop BUSY
fn pulse_reset<H: Hal>(module: &mut Module<H>) -> Result<()> {
    let rst = module.pins().rst;
    module.pin_mode(rst, PinMode::Output);
    module.digital_write(rst, Level::Low);
    module.delay(1);
    module.digital_write(rst, Level::High);
    module.wait_busy()
}

fn version_matches<H: Hal>(module: &mut Module<H>) -> bool {
    let [hi, lo] = REG_VERSION_STRING.to_be_bytes();
    let mut version = [0u8; VERSION_STRING_LEN];
    match module.read_command(&[CMD_READ_REGISTER, hi, lo], &mut version) {
        Ok(()) if version.starts_with(VERSION_PREFIX) => {
            log::debug!(
                "SX126x: version string {:?}",
                String::from_utf8_lossy(&version).trim_end_matches('\0')
            );
            true
        }
        Ok(()) => false,
        Err(err) => {
            log::trace!("SX126x: version read failed: {}", err);
            false
        }
    }
}

/// GetStats counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketStats {
    pub received: u16,
    pub crc_errors: u16,
    pub header_errors: u16,
}

/// SX1262 driver
pub struct Sx126x<H: Hal> {
    core: ChipCore<H>,
    explicit_header: bool,
    implicit_len: u8,
    low_data_rate: bool,
    bandwidth_code: u8,
    gfsk: GfskFrame,
}

impl<H: Hal> Sx126x<H> {
    pub fn new(mut module: Module<H>) -> Self {
        module.set_command_protocol(Some(PROTOCOL));
        Self {
            core: ChipCore::new(module, "SX126x"),
            explicit_header: true,
            implicit_len: u8::MAX,
            low_data_rate: false,
            bandwidth_code: 0x04,
            gfsk: GfskFrame::default(),
        }
    }

    /// Modem selected by the last `begin`/`begin_fsk`
    pub fn modem(&self) -> Modem {
        self.core.settings.modem
    }

    pub fn module(&self) -> &Module<H> {
        self.core.module()
    }

    /// Whether the last modulation parameters enabled low data rate optimization
    pub fn low_data_rate_optimization(&self) -> bool {
        self.low_data_rate
    }

    pub fn module_mut(&mut self) -> &mut Module<H> {
        self.core.module_mut()
    }

    // ----- command helpers -----

    fn send(&mut self, frame: CommandFrame) -> Result<()> {
        self.core.module.send_frame(&frame, true)
    }

    fn write_registers(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let [hi, lo] = addr.to_be_bytes();
        self.core
            .module
            .write_command(&[CMD_WRITE_REGISTER, hi, lo], data)
    }

    fn read_registers(&mut self, addr: u16, buf: &mut [u8]) -> Result<()> {
        let [hi, lo] = addr.to_be_bytes();
        self.core.module.read_command(&[CMD_READ_REGISTER, hi, lo], buf)
    }

    fn read_register(&mut self, addr: u16) -> Result<u8> {
        let mut value = [0u8; 1];
        self.read_registers(addr, &mut value)?;
        Ok(value[0])
    }

    fn set_dio_irq_params(&mut self, irq: IrqFlags, dio1: IrqFlags) -> Result<()> {
        self.send(
            CommandFrame::new(CMD_SET_DIO_IRQ_PARAMS)
                .u16(irq.bits())
                .u16(dio1.bits())
                .u16(0)
                .u16(0),
        )
    }

    /// Pending IRQ sources
    pub fn irq_status(&mut self) -> Result<IrqFlags> {
        let raw = self.core.module.read_command_u16(&[CMD_GET_IRQ_STATUS])?;
        Ok(IrqFlags::from_bits_truncate(raw))
    }

    pub fn clear_irq_status(&mut self, flags: IrqFlags) -> Result<()> {
        self.send(CommandFrame::new(CMD_CLEAR_IRQ_STATUS).u16(flags.bits()))?;
        self.core.pending.clear();
        Ok(())
    }

    fn set_buffer_base_address(&mut self) -> Result<()> {
        self.send(CommandFrame::new(CMD_SET_BUFFER_BASE_ADDRESS).u8(0x00).u8(0x00))
    }

    fn write_modulation_params(&mut self) -> Result<()> {
        let s = &self.core.settings;
        let sf = s.spreading_factor.unwrap_or(9);
        let cr = s.coding_rate.unwrap_or(7);
        self.low_data_rate = lora_symbol_us(sf, s.bandwidth_khz) >= LDRO_SYMBOL_US;
        let ldro = if self.low_data_rate {
            LORA_LOW_DATA_RATE_OPTIMIZE_ON
        } else {
            LORA_LOW_DATA_RATE_OPTIMIZE_OFF
        };
        let frame = CommandFrame::new(CMD_SET_MODULATION_PARAMS)
            .u8(sf)
            .u8(self.bandwidth_code)
            .u8(cr - 4)
            .u8(ldro);
        self.send(frame)
    }

    fn write_packet_params(&mut self, payload_len: u8) -> Result<()> {
        match self.core.settings.modem {
            Modem::Lora => self.write_lora_packet_params(payload_len),
            Modem::Fsk => self.write_fsk_packet_params(payload_len),
        }
    }

    fn write_lora_packet_params(&mut self, payload_len: u8) -> Result<()> {
        let s = &self.core.settings;
        let header = if self.explicit_header {
            LORA_HEADER_EXPLICIT
        } else {
            LORA_HEADER_IMPLICIT
        };
        let crc = if s.crc_enabled { LORA_CRC_ON } else { LORA_CRC_OFF };
        let frame = CommandFrame::new(CMD_SET_PACKET_PARAMS)
            .u16(s.preamble_length)
            .u8(header)
            .u8(payload_len)
            .u8(crc)
            .u8(LORA_IQ_STANDARD);
        self.send(frame)
    }

    /// Payload length field for the packet parameters outside of transmit
    fn rx_payload_len(&self) -> u8 {
        if self.core.settings.modem == Modem::Fsk {
            return self.fsk_rx_payload_len();
        }
        if self.explicit_header {
            u8::MAX
        } else {
            self.implicit_len
        }
    }

    fn config(&mut self, use_ldo: bool, modem: Modem) -> Result<()> {
        let regulator = if use_ldo {
            REGULATOR_LDO
        } else {
            REGULATOR_DC_DC
        };
        let packet_type = match modem {
            Modem::Lora => PACKET_TYPE_LORA,
            Modem::Fsk => PACKET_TYPE_GFSK,
        };
        self.send(CommandFrame::new(CMD_SET_REGULATOR_MODE).u8(regulator))?;
        self.set_buffer_base_address()?;
        self.send(CommandFrame::new(CMD_SET_PACKET_TYPE).u8(packet_type))?;
        self.send(CommandFrame::new(CMD_SET_RX_TX_FALLBACK_MODE).u8(RX_TX_FALLBACK_MODE_STDBY_RC))?;
        if modem == Modem::Lora {
            self.write_cad_params(9)?;
        }
        self.clear_irq_status(IrqFlags::all())?;
        self.set_dio_irq_params(IrqFlags::empty(), IrqFlags::empty())?;
        self.send(CommandFrame::new(CMD_CALIBRATE).u8(CALIBRATE_ALL))?;
        self.core.module.delay(5);
        self.core.module.wait_busy()?;

        let settings = &mut self.core.settings;
        settings.modem = modem;
        settings.bit_rate_kbps = None;
        settings.frequency_deviation_khz = None;
        settings.shaping = DataShaping::None;
        settings.encoding = Encoding::Nrz;
        settings.packet_length = PacketLengthMode::Variable {
            max: MAX_PACKET_LENGTH as u8,
        };
        match modem {
            Modem::Lora => {
                settings.spreading_factor = Some(9);
                settings.bandwidth_khz = 125.0;
                settings.coding_rate = Some(7);
            }
            Modem::Fsk => {
                settings.spreading_factor = None;
                settings.bandwidth_khz = 0.0;
                settings.coding_rate = None;
            }
        }
        self.bandwidth_code = 0x04;
        self.explicit_header = true;
        self.gfsk = GfskFrame::default();
        Ok(())
    }

    /// Reset and identify the chip by its version string
    fn start_chip(&mut self) -> Result<()> {
        self.core.module.set_command_protocol(Some(PROTOCOL));
        self.core.module.init();
        self.core.attach_irq();
        self.core
            .find_chip(|m| pulse_reset(m).is_ok() && version_matches(m))
    }

    fn write_cad_params(&mut self, sf: u8) -> Result<()> {
        let frame = CommandFrame::new(CMD_SET_CAD_PARAMS)
            .u8(CAD_ON_8_SYMB)
            .u8(sf + CAD_DET_PEAK_OFFSET)
            .u8(CAD_DET_MIN)
            .u8(CAD_GOTO_STDBY)
            .u24(0);
        self.send(frame)
    }

    fn apply(&mut self, config: &Sx126xConfig) -> Result<()> {
        self.standby()?;
        self.config(config.use_regulator_ldo, Modem::Lora)?;
        if config.tcxo_voltage > 0.0 {
            self.set_tcxo(config.tcxo_voltage, DEFAULT_TCXO_DELAY_US)?;
        }
        self.set_spreading_factor(config.spreading_factor)?;
        self.set_bandwidth(config.bandwidth_khz)?;
        self.set_coding_rate(config.coding_rate)?;
        self.set_sync_word(config.sync_word)?;
        self.set_current_limit(config.current_limit_ma)?;
        self.set_crc(config.crc)?;
        self.set_preamble_length(config.preamble_length)?;
        self.set_dio2_as_rf_switch(config.dio2_rf_switch)?;
        self.set_frequency(config.frequency_mhz)?;
        self.set_output_power(config.output_power_dbm)?;
        self.fix_pa_clamping()?;
        if config.explicit_header {
            self.explicit_header()?;
        } else {
            self.implicit_header(config.implicit_length)?;
        }
        self.standby()
    }

    // ----- link configuration -----

    /// Spreading factor 5 to 12.
    pub fn set_spreading_factor(&mut self, sf: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        if !SPREADING_FACTORS.contains(&sf) {
            return Err(RadioError::InvalidSpreadingFactor(sf));
        }
        in_standby(self, |radio| {
            let previous = radio.core.settings.spreading_factor;
            radio.core.settings.spreading_factor = Some(sf);
            if let Err(err) = radio.write_modulation_params() {
                radio.core.settings.spreading_factor = previous;
                return Err(err);
            }
            radio.write_cad_params(sf)
        })
    }

    pub fn set_bandwidth(&mut self, bw_khz: f32) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        let code = bandwidth_code(bw_khz).ok_or(RadioError::InvalidBandwidth(bw_khz))?;
        in_standby(self, |radio| {
            let previous = (radio.core.settings.bandwidth_khz, radio.bandwidth_code);
            radio.core.settings.bandwidth_khz = bw_khz;
            radio.bandwidth_code = code;
            if let Err(err) = radio.write_modulation_params() {
                (radio.core.settings.bandwidth_khz, radio.bandwidth_code) = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// Coding rate 4/`cr`, with `cr` in 5..=8.
    pub fn set_coding_rate(&mut self, cr: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        if !(5..=8).contains(&cr) {
            return Err(RadioError::InvalidCodingRate(cr));
        }
        in_standby(self, |radio| {
            let previous = radio.core.settings.coding_rate;
            radio.core.settings.coding_rate = Some(cr);
            if let Err(err) = radio.write_modulation_params() {
                radio.core.settings.coding_rate = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// One-byte LoRa sync word; 0x12 is private, 0x34 public networks. GFSK uses
    /// [`Sx126x::set_fsk_sync_word`].
    pub fn set_sync_word(&mut self, sync_word: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        let sw = SyncWord::new(&[sync_word])?;
        in_standby(self, |radio| {
            radio.write_registers(REG_LORA_SYNC_WORD_MSB, &sync_word_bytes(sync_word))?;
            radio.core.settings.sync_word = sw;
            Ok(())
        })
    }

    /// Over-current protection limit, 0 to 140 mA in 2.5 mA steps.
    pub fn set_current_limit(&mut self, limit_ma: f32) -> Result<()> {
        if !(0.0..=CURRENT_LIMIT_MAX_MA).contains(&limit_ma) {
            return Err(RadioError::InvalidCurrentLimit(limit_ma));
        }
        let raw = (limit_ma / OCP_STEP_MA) as u8;
        in_standby(self, |radio| {
            radio.write_registers(REG_OCP_CONFIGURATION, &[raw])
        })
    }

    /// Current over-current limit, mA
    pub fn current_limit(&mut self) -> Result<f32> {
        Ok(f32::from(self.read_register(REG_OCP_CONFIGURATION)?) * OCP_STEP_MA)
    }

    /// Preamble length: LoRa symbols or GFSK bits.
    pub fn set_preamble_length(&mut self, length: u16) -> Result<()> {
        in_standby(self, |radio| {
            let previous = radio.core.settings.preamble_length;
            radio.core.settings.preamble_length = length;
            let len = radio.rx_payload_len();
            if let Err(err) = radio.write_packet_params(len) {
                radio.core.settings.preamble_length = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// LoRa payload CRC, or the two-byte inverted CCITT CRC in GFSK.
    pub fn set_crc(&mut self, enabled: bool) -> Result<()> {
        if self.core.settings.modem == Modem::Fsk {
            let len = if enabled { 2 } else { 0 };
            return self.set_fsk_crc(len, GFSK_CRC_INITIAL, GFSK_CRC_POLYNOMIAL, true);
        }
        in_standby(self, |radio| {
            let previous = radio.core.settings.crc_enabled;
            radio.core.settings.crc_enabled = enabled;
            let len = radio.rx_payload_len();
            if let Err(err) = radio.write_packet_params(len) {
                radio.core.settings.crc_enabled = previous;
                return Err(err);
            }
            Ok(())
        })
    }

    /// Header-less packets of exactly `len` bytes.
    pub fn implicit_header(&mut self, len: u8) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        in_standby(self, |radio| radio.write_header_mode(false, len))
    }

    pub fn explicit_header(&mut self) -> Result<()> {
        self.core.require_modem(Modem::Lora)?;
        let len = self.implicit_len;
        in_standby(self, |radio| radio.write_header_mode(true, len))
    }

    fn write_header_mode(&mut self, explicit: bool, len: u8) -> Result<()> {
        let previous = (self.explicit_header, self.implicit_len);
        self.explicit_header = explicit;
        self.implicit_len = len;
        let payload_len = self.rx_payload_len();
        if let Err(err) = self.write_packet_params(payload_len) {
            (self.explicit_header, self.implicit_len) = previous;
            return Err(err);
        }
        self.core.settings.packet_length = if explicit {
            PacketLengthMode::Variable {
                max: MAX_PACKET_LENGTH as u8,
            }
        } else {
            PacketLengthMode::Fixed { len }
        };
        Ok(())
    }

    /// Power a TCXO from DIO3 at `voltage` volts, waiting `delay_us` for it to start.
    pub fn set_tcxo(&mut self, voltage: f32, delay_us: u32) -> Result<()> {
        let code = tcxo_code(voltage).ok_or(RadioError::InvalidTcxoVoltage(voltage))?;
        let delay = (delay_us as f32 / TIMER_STEP_US) as u32;
        in_standby(self, |radio| {
            if radio.device_errors()?.contains(DeviceErrors::XOSC_START) {
                log::debug!("SX126x: clearing crystal start error before TCXO setup");
                radio.clear_device_errors()?;
            }
            radio.send(
                CommandFrame::new(CMD_SET_DIO3_AS_TCXO_CTRL)
                    .u8(code)
                    .u24(delay),
            )
        })
    }

    /// Let DIO2 drive the antenna switch (high during TX).
    pub fn set_dio2_as_rf_switch(&mut self, enabled: bool) -> Result<()> {
        let mode = if enabled {
            DIO2_AS_RF_SWITCH
        } else {
            DIO2_AS_IRQ
        };
        self.send(CommandFrame::new(CMD_SET_DIO2_AS_RF_SWITCH_CTRL).u8(mode))
    }

    /// Boosted LNA gain trades about 2 mA of receive current for sensitivity.
    pub fn set_rx_boosted_gain(&mut self, boosted: bool) -> Result<()> {
        let gain = if boosted {
            RX_GAIN_BOOSTED
        } else {
            RX_GAIN_POWER_SAVING
        };
        self.write_registers(REG_RX_GAIN, &[gain])
    }

    pub fn set_regulator(&mut self, use_ldo: bool) -> Result<()> {
        let mode = if use_ldo {
            REGULATOR_LDO
        } else {
            REGULATOR_DC_DC
        };
        in_standby(self, |radio| {
            radio.send(CommandFrame::new(CMD_SET_REGULATOR_MODE).u8(mode))
        })
    }

    fn calibrate_image(&mut self, freq_mhz: f32) -> Result<()> {
        let [lo, hi] = image_calibration(freq_mhz);
        self.send(CommandFrame::new(CMD_CALIBRATE_IMAGE).u8(lo).u8(hi))
    }

    /// Set TX_CLAMP_CONFIG bits 4-1, required with a mismatched antenna.
    fn fix_pa_clamping(&mut self) -> Result<()> {
        let clamp = self.read_register(REG_TX_CLAMP_CONFIG)?;
        self.write_registers(REG_TX_CLAMP_CONFIG, &[clamp | TX_CLAMP_MASK])
    }

    /// Modulation quality at 500 kHz depends on SENSITIVITY_CONFIG bit 2.
    fn fix_sensitivity(&mut self) -> Result<()> {
        let value = self.read_register(REG_SENSITIVITY_CONFIG)?;
        let wide = (self.core.settings.bandwidth_khz - 500.0).abs() < 0.001;
        let value = if wide {
            value & !SENSITIVITY_BW500_BIT
        } else {
            value | SENSITIVITY_BW500_BIT
        };
        self.write_registers(REG_SENSITIVITY_CONFIG, &[value])
    }

    // ----- packet I/O -----

    /// Time on air of a `len`-byte packet with the current settings, µs
    pub fn time_on_air_us(&self, len: usize) -> u64 {
        if self.core.settings.modem == Modem::Fsk {
            return self.fsk_time_on_air_us(len);
        }
        let s = &self.core.settings;
        if s.bandwidth_khz <= 0.0 {
            return 0;
        }
        let sf = s.spreading_factor.unwrap_or(9);
        let symbol = lora_symbol_us(sf, s.bandwidth_khz);
        let sf = f32::from(sf);
        // SF5 and SF6 use a shorter sync sequence
        let (preamble_extra, header_bits) = if sf < 7.0 { (6.25, 0.0) } else { (4.25, 8.0) };
        let divisor = if symbol >= LDRO_SYMBOL_US {
            4.0 * (sf - 2.0)
        } else {
            4.0 * sf
        };
        let explicit = if self.explicit_header { 20.0 } else { 0.0 };
        let crc = if s.crc_enabled { 16.0 } else { 0.0 };
        let bits = (8.0 * len as f32 + crc - 4.0 * sf + header_bits + explicit).max(0.0);
        let coded = (bits / divisor).ceil() * f32::from(s.coding_rate.unwrap_or(7));
        let symbols = f32::from(s.preamble_length) + preamble_extra + 8.0 + coded;
        (symbols * symbol) as u64
    }

    fn symbol_us(&self) -> f32 {
        let s = &self.core.settings;
        lora_symbol_us(s.spreading_factor.unwrap_or(9), s.bandwidth_khz)
    }

    /// Arm reception. `timeout_raw` is in 15.625 µs steps; [`RX_TIMEOUT_INF`]
    /// listens continuously.
    pub fn start_receive_timeout(&mut self, timeout_raw: u32) -> Result<()> {
        self.standby()?;
        self.set_dio_irq_params(
            IrqFlags::RX_DONE | IrqFlags::TIMEOUT | IrqFlags::CRC_ERR | IrqFlags::HEADER_ERR,
            IrqFlags::RX_DONE | IrqFlags::TIMEOUT,
        )?;
        self.set_buffer_base_address()?;
        self.clear_irq_status(IrqFlags::all())?;
        // A GFSK transmit leaves its own length in the packet parameters
        if self.core.settings.modem == Modem::Fsk || !self.explicit_header {
            let len = self.rx_payload_len();
            self.write_packet_params(len)?;
        }
        self.core.module.set_rf_switch_state(RfSwitchMode::Rx);
        self.send(CommandFrame::new(CMD_SET_RX).u24(timeout_raw))?;
        if timeout_raw == RX_TIMEOUT_INF {
            self.core.set_state(RadioState::ReceiveContinuous);
        } else {
            self.core.set_state(RadioState::Receive);
        }
        Ok(())
    }

    fn rx_window_us(&self) -> u64 {
        match self.core.settings.modem {
            Modem::Lora => (self.symbol_us() * RX_TIMEOUT_SYMBOLS as f32) as u64,
            Modem::Fsk => 5 * self.time_on_air_us(usize::from(self.fsk_rx_payload_len())),
        }
    }

    /// LoRa: 150 % of the airtime. GFSK: 500 %.
    fn tx_budget_us(&self, len: usize) -> u64 {
        match self.core.settings.modem {
            Modem::Lora => self.time_on_air_us(len) * 3 / 2,
            Modem::Fsk => self.time_on_air_us(len) * 5,
        }
    }

    fn finish_with_standby(&mut self) -> Result<()> {
        self.standby()?;
        self.clear_irq_status(IrqFlags::all())
    }

    // ----- measurements and status -----

    /// SNR of the last received LoRa packet, dB
    pub fn snr(&mut self) -> Result<f32> {
        self.core.require_modem(Modem::Lora)?;
        let mut status = [0u8; 3];
        self.core
            .module
            .read_command(&[CMD_GET_PACKET_STATUS], &mut status)?;
        Ok(f32::from(status[1] as i8) / 4.0)
    }

    /// Current RSSI while receiving, dBm
    pub fn instant_rssi(&mut self) -> Result<f32> {
        let mut raw = [0u8; 1];
        self.core.module.read_command(&[CMD_GET_RSSI_INST], &mut raw)?;
        Ok(-f32::from(raw[0]) / 2.0)
    }

    /// 32 bits from the hardware random number generator; the chip must be receiving.
    pub fn random_number(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.read_registers(REG_RANDOM_NUMBER_0, &mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    pub fn device_errors(&mut self) -> Result<DeviceErrors> {
        let raw = self
            .core
            .module
            .read_command_u16(&[CMD_GET_DEVICE_ERRORS])?;
        Ok(DeviceErrors::from_bits_truncate(raw))
    }

    pub fn clear_device_errors(&mut self) -> Result<()> {
        self.send(CommandFrame::new(CMD_CLEAR_DEVICE_ERRORS).u16(0))
    }

    /// Packet counters kept by the chip since the last reset
    pub fn packet_stats(&mut self) -> Result<PacketStats> {
        let mut raw = [0u8; 6];
        self.core.module.read_command(&[CMD_GET_STATS], &mut raw)?;
        Ok(PacketStats {
            received: be_u16(&raw[0..2]),
            crc_errors: be_u16(&raw[2..4]),
            header_errors: be_u16(&raw[4..6]),
        })
    }

    /// Chip mode and last command status
    pub fn status(&mut self) -> Result<ChipStatus> {
        let mut raw = [0u8; 1];
        self.core.module.read_command(&[CMD_GET_STATUS], &mut raw)?;
        Ok(ChipStatus(raw[0]))
    }
}

impl<H: Hal> PhysicalLayer for Sx126x<H> {
    type Config = Sx126xConfig;

    fn begin(&mut self, config: &Sx126xConfig) -> Result<()> {
        self.start_chip()?;

        let snapshot = self.core.settings.clone();
        if let Err(err) = self.apply(config) {
            log::warn!("SX126x: begin failed: {}", err);
            self.core.settings = snapshot;
            return Err(err);
        }
        self.core.ready = true;
        log::info!(
            "SX1262 ready at {} MHz, SF{} / {} kHz, {} dBm",
            config.frequency_mhz,
            config.spreading_factor,
            config.bandwidth_khz,
            config.output_power_dbm
        );
        Ok(())
    }

    fn reset(&mut self) {
        if let Err(err) = pulse_reset(&mut self.core.module) {
            log::warn!("SX126x: BUSY stuck after reset: {}", err);
        }
    }

    fn sleep(&mut self) -> Result<()> {
        self.core.module.set_rf_switch_state(RfSwitchMode::Idle);
        // BUSY stays high while asleep
        let frame = CommandFrame::new(CMD_SET_SLEEP).u8(SLEEP_START_WARM | SLEEP_RTC_OFF);
        self.core.module.send_frame(&frame, false)?;
        self.core.module.delay_us(500);
        self.core.set_state(RadioState::Sleep);
        Ok(())
    }

    fn standby(&mut self) -> Result<()> {
        if self.core.state == RadioState::Sleep {
            self.core.module.wake()?;
        }
        self.core.module.set_rf_switch_state(RfSwitchMode::Idle);
        self.send(CommandFrame::new(CMD_SET_STANDBY).u8(STANDBY_RC))?;
        self.core.set_state(RadioState::Standby);
        Ok(())
    }

    fn state(&self) -> RadioState {
        self.core.state
    }

    fn settings(&self) -> Option<&LinkSettings> {
        self.core.settings()
    }

    /// 150 to 960 MHz; the image is recalibrated for the new band.
    fn set_frequency(&mut self, freq_mhz: f32) -> Result<()> {
        if !FREQUENCY_RANGE_MHZ.contains(&freq_mhz) {
            return Err(RadioError::InvalidFrequency(freq_mhz));
        }
        let frf = (f64::from(freq_mhz) * f64::from(1u32 << 25) / 32.0) as u32;
        in_standby(self, |radio| {
            radio.calibrate_image(freq_mhz)?;
            radio.send(CommandFrame::new(CMD_SET_RF_FREQUENCY).u32(frf))?;
            radio.core.settings.frequency_mhz = freq_mhz;
            Ok(())
        })
    }

    /// -17 to 22 dBm on the high-power PA. The over-current limit survives.
    fn set_output_power(&mut self, power_dbm: i8) -> Result<()> {
        if !OUTPUT_POWER_RANGE_DBM.contains(&power_dbm) {
            return Err(RadioError::InvalidOutputPower(power_dbm));
        }
        in_standby(self, |radio| {
            // SetPaConfig resets the OCP register
            let ocp = radio.read_register(REG_OCP_CONFIGURATION)?;
            radio.send(
                CommandFrame::new(CMD_SET_PA_CONFIG)
                    .u8(PA_DUTY_CYCLE)
                    .u8(PA_HP_MAX)
                    .u8(PA_DEVICE_SEL_SX1262)
                    .u8(PA_LUT),
            )?;
            radio.send(
                CommandFrame::new(CMD_SET_TX_PARAMS)
                    .u8(power_dbm as u8)
                    .u8(PA_RAMP_200U),
            )?;
            radio.write_registers(REG_OCP_CONFIGURATION, &[ocp])?;
            radio.core.settings.output_power_dbm = power_dbm;
            Ok(())
        })
    }

    fn set_data_shaping(&mut self, shaping: DataShaping) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        self.set_fsk_shaping(shaping)
    }

    /// GFSK: NRZ or whitening.
    fn set_encoding(&mut self, encoding: Encoding) -> Result<()> {
        self.core.require_modem(Modem::Fsk)?;
        self.set_fsk_encoding(encoding)
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<()> {
        if self.core.settings.modem == Modem::Fsk {
            return self.start_transmit_to(data, 0x00);
        }
        if data.len() > MAX_PACKET_LENGTH {
            return Err(RadioError::PacketTooLong {
                len: data.len(),
                max: MAX_PACKET_LENGTH,
            });
        }
        self.standby()?;
        self.write_packet_params(data.len() as u8)?;
        self.set_dio_irq_params(IrqFlags::TX_DONE | IrqFlags::TIMEOUT, IrqFlags::TX_DONE)?;
        self.set_buffer_base_address()?;
        self.core
            .module
            .write_command(&[CMD_WRITE_BUFFER, 0x00], data)?;
        self.clear_irq_status(IrqFlags::all())?;
        self.fix_sensitivity()?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Tx);
        self.send(CommandFrame::new(CMD_SET_TX).u24(TX_TIMEOUT_NONE))?;
        self.core.set_state(RadioState::Transmit);
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        let budget = self.tx_budget_us(data.len());
        let start = self.core.module.micros();
        self.start_transmit(data)?;

        let outcome = self.core.wait_irq(budget, false);
        let elapsed = self.core.module.micros().saturating_sub(start);
        self.finish_with_standby()?;
        if outcome != WaitOutcome::Done {
            log::warn!("SX126x: transmit timed out after {} us", elapsed);
            return Err(RadioError::TxTimeout);
        }
        self.core.record_data_rate(data.len(), elapsed);
        Ok(())
    }

    fn start_receive(&mut self) -> Result<()> {
        self.start_receive_timeout(RX_TIMEOUT_INF)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let window = self.rx_window_us();
        let raw = ((window as f32 / TIMER_STEP_US) as u32).min(RX_TIMEOUT_INF - 1);
        self.start_receive_timeout(raw)?;

        let max_len = match self.core.settings.modem {
            Modem::Lora => MAX_PACKET_LENGTH,
            Modem::Fsk => usize::from(self.fsk_rx_payload_len()),
        };
        let budget = (window + self.time_on_air_us(max_len)) * 3 / 2;
        if self.core.wait_irq(budget, false) == WaitOutcome::Done {
            if !self.irq_status()?.contains(IrqFlags::TIMEOUT) {
                return self.read_data(buf);
            }
            log::debug!("SX126x: hardware receive timeout");
        }
        self.finish_with_standby()?;
        log::warn!("SX126x: receive timed out");
        Err(RadioError::RxTimeout)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.core.settings.modem == Modem::Fsk {
            return self.read_fsk_data(buf);
        }
        self.standby()?;
        let irq = self.irq_status()?;

        let mut rx_status = [0u8; 2];
        self.core
            .module
            .read_command(&[CMD_GET_RX_BUFFER_STATUS], &mut rx_status)?;
        let [len, offset] = rx_status;
        let len = if self.explicit_header {
            usize::from(len)
        } else {
            usize::from(self.implicit_len)
        };
        let n = len.min(buf.len());
        self.core
            .module
            .read_command(&[CMD_READ_BUFFER, offset], &mut buf[..n])?;
        self.clear_irq_status(IrqFlags::all())?;

        if irq.intersects(IrqFlags::CRC_ERR | IrqFlags::HEADER_ERR) {
            log::debug!("SX126x: damaged packet ({:?})", irq);
            return Err(RadioError::CrcMismatch);
        }
        Ok(n)
    }

    fn packet_length(&mut self) -> Result<usize> {
        if self.core.settings.modem == Modem::Lora && !self.explicit_header {
            return Ok(usize::from(self.implicit_len));
        }
        let mut rx_status = [0u8; 2];
        self.core
            .module
            .read_command(&[CMD_GET_RX_BUFFER_STATUS], &mut rx_status)?;
        Ok(usize::from(rx_status[0]))
    }

    /// LoRa: RssiPkt. GFSK: RssiAvg.
    fn rssi(&mut self) -> f32 {
        let mut status = [0u8; 3];
        let field = match self.core.settings.modem {
            Modem::Lora => 0,
            Modem::Fsk => 2,
        };
        match self
            .core
            .module
            .read_command(&[CMD_GET_PACKET_STATUS], &mut status)
        {
            Ok(()) => -f32::from(status[field]) / 2.0,
            Err(err) => {
                log::warn!("SX126x: packet status unavailable: {}", err);
                f32::NAN
            }
        }
    }

    fn random_byte(&mut self) -> Result<u8> {
        self.start_receive_timeout(RX_TIMEOUT_INF)?;
        self.core.module.delay(10);
        let mut value = 0u8;
        for bit in 0..8 {
            let mut raw = [0u8; 1];
            self.core.module.read_command(&[CMD_GET_RSSI_INST], &mut raw)?;
            value |= (raw[0] & 0x01) << bit;
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

    /// Continuous wave at the current frequency, or at raw `frf` when given.
    fn transmit_direct(&mut self, frf: Option<u32>) -> Result<()> {
        self.standby()?;
        if let Some(frf) = frf {
            self.send(CommandFrame::new(CMD_SET_RF_FREQUENCY).u32(frf))?;
        }
        self.core.module.set_rf_switch_state(RfSwitchMode::Tx);
        self.send(CommandFrame::new(CMD_SET_TX_CONTINUOUS_WAVE))?;
        self.core.set_state(RadioState::DirectTransmit);
        Ok(())
    }

    fn start_frequency_synthesis(&mut self) -> Result<()> {
        self.send(CommandFrame::new(CMD_SET_FS))?;
        self.core.set_state(RadioState::FrequencySynthesis);
        Ok(())
    }

    fn scan_channel(&mut self) -> Result<ChannelScan> {
        self.core.require_modem(Modem::Lora)?;
        self.standby()?;
        let cad = IrqFlags::CAD_DETECTED | IrqFlags::CAD_DONE;
        self.set_dio_irq_params(cad, cad)?;
        self.clear_irq_status(IrqFlags::all())?;
        self.core.module.set_rf_switch_state(RfSwitchMode::Rx);
        self.send(CommandFrame::new(CMD_SET_CAD))?;
        self.core.set_state(RadioState::ChannelActivityDetect);

        let budget = CAD_BASE_BUDGET_US + (self.symbol_us() * 16.0) as u64;
        let outcome = self.core.wait_irq(budget, false);
        let irq = self.irq_status()?;
        self.finish_with_standby()?;
        match outcome {
            WaitOutcome::Done if irq.contains(IrqFlags::CAD_DETECTED) => Ok(ChannelScan::Detected),
            WaitOutcome::Done => Ok(ChannelScan::Free),
            _ => {
                log::warn!("SX126x: channel scan did not complete");
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
        MAX_PACKET_LENGTH
    }
}

//! Command-level model of an SX1262.
//!
//! Bytes clocked in during one chip-select window form a command; it executes when
//! chip select is released. Every byte returned while parameters are clocked in is
//! the status byte (`mode << 4 | command status`); read commands return their reply
//! after the status position. Unknown opcodes report "command invalid". IRQ sources
//! are latched only when enabled in the IRQ mask, and DIO1 follows the DIO1 mask.
//! BUSY is high while asleep or when `busy_stuck` is set.
//!
//! Modulation and packet parameters are kept per packet type. In GFSK the model
//! sends the buffer image (length byte first in variable mode) on the FSK air,
//! keyed by the carrier in the RF69/SX127x 2^19 frequency units, and applies the
//! node/broadcast address filter to received packets.

use super::{channel_khz, next_noise, LoraFrame, FSK_AIR, LORA_AIR};
use radiophy_rs::chips::sx126x::commands::*;
use radiophy_rs::hal::{AirFrame, EmulatedRadio, Level};
use std::collections::HashMap;

const VERSION: &[u8; 16] = b"SX1261 V2D 2D02\0";
const TX_DURATION_US: u64 = 500;
const CAD_DURATION_US: u64 = 1_000;
/// OCP value loaded by SetPaConfig for the SX1262 high-power PA
const OCP_AFTER_PA_CONFIG: u8 = 0x38;

const KNOWN_OPCODES: [u8; 35] = [
    CMD_SET_SLEEP,
    CMD_SET_STANDBY,
    CMD_SET_FS,
    CMD_SET_TX,
    CMD_SET_RX,
    CMD_SET_CAD,
    CMD_SET_TX_CONTINUOUS_WAVE,
    CMD_SET_REGULATOR_MODE,
    CMD_CALIBRATE,
    CMD_CALIBRATE_IMAGE,
    CMD_SET_PA_CONFIG,
    CMD_SET_RX_TX_FALLBACK_MODE,
    CMD_WRITE_REGISTER,
    CMD_READ_REGISTER,
    CMD_WRITE_BUFFER,
    CMD_READ_BUFFER,
    CMD_SET_DIO_IRQ_PARAMS,
    CMD_GET_IRQ_STATUS,
    CMD_CLEAR_IRQ_STATUS,
    CMD_SET_DIO2_AS_RF_SWITCH_CTRL,
    CMD_SET_DIO3_AS_TCXO_CTRL,
    CMD_SET_RF_FREQUENCY,
    CMD_SET_PACKET_TYPE,
    CMD_SET_TX_PARAMS,
    CMD_SET_MODULATION_PARAMS,
    CMD_SET_PACKET_PARAMS,
    CMD_SET_CAD_PARAMS,
    CMD_SET_BUFFER_BASE_ADDRESS,
    CMD_GET_STATUS,
    CMD_GET_RSSI_INST,
    CMD_GET_RX_BUFFER_STATUS,
    CMD_GET_PACKET_STATUS,
    CMD_GET_DEVICE_ERRORS,
    CMD_CLEAR_DEVICE_ERRORS,
    CMD_GET_STATS,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sleep,
    StandbyRc,
    FrequencySynthesis,
    Transmit,
    Receive,
    ChannelActivity,
}

impl Mode {
    fn status_bits(self) -> u8 {
        match self {
            Mode::Sleep | Mode::StandbyRc => 0x2,
            Mode::FrequencySynthesis => 0x4,
            Mode::Receive | Mode::ChannelActivity => 0x5,
            Mode::Transmit => 0x6,
        }
    }
}

fn param(p: &[u8], idx: usize) -> u8 {
    p.get(idx).copied().unwrap_or(0)
}

fn param_u16(p: &[u8], idx: usize) -> u16 {
    u16::from_be_bytes([param(p, idx), param(p, idx + 1)])
}

fn param_u24(p: &[u8], idx: usize) -> u32 {
    u32::from_be_bytes([0, param(p, idx), param(p, idx + 1), param(p, idx + 2)])
}

pub struct Sx126xEmulator {
    mode: Mode,
    regs: HashMap<u16, u8>,
    buffer: [u8; 256],
    cmd: Vec<u8>,
    irq: u16,
    irq_mask: u16,
    dio1_mask: u16,
    frf: u32,
    tx_base: u8,
    rx_base: u8,
    rx_len: u8,
    rx_offset: u8,
    rx_continuous: bool,
    now_us: u64,
    tx_end_us: Option<u64>,
    rx_deadline_us: Option<u64>,
    cad_end_us: Option<u64>,
    errors: u16,
    stats: [u16; 3],
    noise: u8,
    inbox: Vec<(u64, AirFrame)>,
    packet_type: u8,
    /// Last SetModulationParams: SF, bandwidth code, CR - 4, LDRO
    pub modulation: [u8; 4],
    /// Last SetPacketParams: preamble (2), header type, length, CRC, IQ
    pub packet: [u8; 6],
    /// Last GFSK SetModulationParams: bit rate (3), shaping, bandwidth, deviation (3)
    pub fsk_modulation: [u8; 8],
    /// Last GFSK SetPacketParams: preamble (2), detector, sync bits, address filter,
    /// length type, length, CRC type, whitening
    pub fsk_packet: [u8; 9],
    /// Last SetTxParams: power, ramp
    pub tx_params: [u8; 2],
    /// Last SetDio3AsTcxoCtrl: voltage code, delay in 15.625 µs steps
    pub tcxo: Option<(u8, u32)>,
    pub dio2_rf_switch: bool,
    pub image_calibration: Option<[u8; 2]>,
    /// BUSY never drops
    pub busy_stuck: bool,
    pub channel_busy: bool,
    /// The next packet received fails its CRC
    pub corrupt_next: bool,
    /// Raw RssiPkt for received packets (-value / 2 dBm)
    pub packet_rssi_raw: u8,
    /// Raw SnrPkt for received packets, quarter dB
    pub packet_snr_raw: i8,
    /// Opcodes executed, in order
    pub opcodes: Vec<u8>,
    pub transmitted: Vec<LoraFrame>,
    /// GFSK buffer images sent
    pub transmitted_fsk: Vec<Vec<u8>>,
    pub resets: u32,
}

impl Default for Sx126xEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Sx126xEmulator {
    pub fn new() -> Self {
        let mut emu = Self {
            mode: Mode::StandbyRc,
            regs: HashMap::new(),
            buffer: [0; 256],
            cmd: Vec::new(),
            irq: 0,
            irq_mask: 0,
            dio1_mask: 0,
            frf: 0,
            tx_base: 0,
            rx_base: 0,
            rx_len: 0,
            rx_offset: 0,
            rx_continuous: false,
            now_us: 0,
            tx_end_us: None,
            rx_deadline_us: None,
            cad_end_us: None,
            errors: 0,
            stats: [0; 3],
            noise: 0x71,
            inbox: Vec::new(),
            packet_type: PACKET_TYPE_LORA,
            modulation: [0; 4],
            packet: [0; 6],
            fsk_modulation: [0; 8],
            fsk_packet: [0; 9],
            tx_params: [0; 2],
            tcxo: None,
            dio2_rf_switch: false,
            image_calibration: None,
            busy_stuck: false,
            channel_busy: false,
            corrupt_next: false,
            packet_rssi_raw: 128,
            packet_snr_raw: 32,
            opcodes: Vec::new(),
            transmitted: Vec::new(),
            transmitted_fsk: Vec::new(),
            resets: 0,
        };
        emu.power_on();
        emu
    }

    fn power_on(&mut self) {
        self.mode = Mode::StandbyRc;
        self.regs.clear();
        for (i, byte) in VERSION.iter().enumerate() {
            self.regs.insert(REG_VERSION_STRING + i as u16, *byte);
        }
        self.regs.insert(REG_LORA_SYNC_WORD_MSB, 0x14);
        self.regs.insert(REG_LORA_SYNC_WORD_MSB + 1, 0x24);
        self.regs.insert(REG_OCP_CONFIGURATION, 0x18);
        self.regs.insert(REG_TX_CLAMP_CONFIG, 0xC8);
        self.regs.insert(REG_RX_GAIN, RX_GAIN_POWER_SAVING);
        self.buffer = [0; 256];
        self.cmd.clear();
        self.irq = 0;
        self.irq_mask = 0;
        self.dio1_mask = 0;
        self.tx_end_us = None;
        self.rx_deadline_us = None;
        self.cad_end_us = None;
        // a TCXO board powers up with the crystal start error latched
        self.errors = DeviceErrors::XOSC_START.bits();
        self.stats = [0; 3];
        self.tcxo = None;
        self.packet_type = PACKET_TYPE_LORA;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn register(&self, addr: u16) -> u8 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn irq_status(&self) -> IrqFlags {
        IrqFlags::from_bits_truncate(self.irq)
    }

    pub fn device_errors(&self) -> DeviceErrors {
        DeviceErrors::from_bits_truncate(self.errors)
    }

    /// Programmed LoRa sync word, recombined from its two register nibbles
    pub fn sync_word(&self) -> u8 {
        let msb = self.register(REG_LORA_SYNC_WORD_MSB);
        let lsb = self.register(REG_LORA_SYNC_WORD_MSB + 1);
        (msb & 0xF0) | (lsb >> 4)
    }

    pub fn channel(&self) -> u32 {
        channel_khz(self.frf, 25)
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    fn gfsk(&self) -> bool {
        self.packet_type == PACKET_TYPE_GFSK
    }

    /// Carrier in 2^19 units of 32 MHz, the key of the FSK air
    fn fsk_channel(&self) -> u32 {
        self.frf >> 6
    }

    fn fsk_variable(&self) -> bool {
        self.fsk_packet[5] == GFSK_PACKET_VARIABLE
    }

    /// Airtime of `bits` at the programmed GFSK bit rate (raw / 1024 µs per bit)
    fn fsk_airtime_us(&self, bits: u64) -> u64 {
        let raw = param_u24(&self.fsk_modulation, 0).max(1);
        bits * u64::from(raw) / 1024
    }

    /// Deliver a GFSK buffer image as if heard `delay_us` from now.
    pub fn schedule_rx_fsk(&mut self, payload: &[u8], delay_us: u64) {
        let air = AirFrame {
            family: FSK_AIR,
            channel: self.fsk_channel(),
            payload: payload.to_vec(),
        };
        self.inbox.push((self.now_us + delay_us, air));
    }

    /// Deliver `frame` as if heard `delay_us` from now, on the current carrier.
    pub fn schedule_rx(&mut self, frame: &LoraFrame, delay_us: u64) {
        let air = AirFrame {
            family: LORA_AIR,
            channel: self.channel(),
            payload: frame.encode(),
        };
        self.inbox.push((self.now_us + delay_us, air));
    }

    fn status(&self) -> u8 {
        let cmd_status = match self.cmd.first() {
            Some(op) if !KNOWN_OPCODES.contains(op) => STATUS_CMD_INVALID,
            _ => 0,
        };
        (self.mode.status_bits() << 4) | cmd_status
    }

    fn raise(&mut self, flags: IrqFlags) {
        self.irq |= flags.bits() & self.irq_mask;
    }

    fn to_standby(&mut self) {
        self.mode = Mode::StandbyRc;
        self.tx_end_us = None;
        self.rx_deadline_us = None;
        self.cad_end_us = None;
    }

    fn read_reply(&mut self, op: u8, idx: usize) -> u8 {
        let reply: Vec<u8> = match op {
            CMD_GET_STATUS => vec![self.status()],
            CMD_GET_IRQ_STATUS => self.irq.to_be_bytes().to_vec(),
            CMD_GET_RX_BUFFER_STATUS => vec![self.rx_len, self.rx_offset],
            CMD_GET_PACKET_STATUS if self.gfsk() => {
                vec![0, self.packet_rssi_raw, self.packet_rssi_raw]
            }
            CMD_GET_PACKET_STATUS => vec![
                self.packet_rssi_raw,
                self.packet_snr_raw as u8,
                self.packet_rssi_raw,
            ],
            CMD_GET_RSSI_INST => vec![0x80 | next_noise(&mut self.noise) & 0x3F],
            CMD_GET_DEVICE_ERRORS => self.errors.to_be_bytes().to_vec(),
            CMD_GET_STATS => self.stats.iter().flat_map(|v| v.to_be_bytes()).collect(),
            _ => Vec::new(),
        };
        reply.get(idx).copied().unwrap_or(0)
    }

    fn register_read(&mut self, addr: u16) -> u8 {
        let random = REG_RANDOM_NUMBER_0..REG_RANDOM_NUMBER_0 + 4;
        if random.contains(&addr) && self.mode == Mode::Receive {
            return next_noise(&mut self.noise);
        }
        self.register(addr)
    }

    fn execute(&mut self, cmd: &[u8], now_us: u64, air: &mut Vec<AirFrame>) {
        let op = cmd[0];
        let p = &cmd[1..];
        match op {
            CMD_SET_SLEEP => {
                self.to_standby();
                self.mode = Mode::Sleep;
            }
            CMD_SET_STANDBY => self.to_standby(),
            CMD_SET_FS => {
                self.to_standby();
                self.mode = Mode::FrequencySynthesis;
            }
            CMD_SET_TX if self.gfsk() => {
                self.to_standby();
                let len = usize::from(self.fsk_packet[6]);
                let base = usize::from(self.tx_base);
                let mut image = Vec::with_capacity(len + 1);
                if self.fsk_variable() {
                    image.push(len as u8);
                }
                image.extend((0..len).map(|i| self.buffer[(base + i) & 0xFF]));
                air.push(AirFrame {
                    family: FSK_AIR,
                    channel: self.fsk_channel(),
                    payload: image.clone(),
                });
                self.transmitted_fsk.push(image);
                self.mode = Mode::Transmit;
                self.tx_end_us = Some(now_us + self.fsk_airtime_us(8 * (len as u64 + 8)));
            }
            CMD_SET_TX => {
                self.to_standby();
                let len = usize::from(self.packet[3]);
                let base = usize::from(self.tx_base);
                let payload = (0..len).map(|i| self.buffer[(base + i) & 0xFF]).collect();
                let frame = LoraFrame {
                    spreading_factor: self.modulation[0],
                    crc: self.packet[4] == LORA_CRC_ON,
                    sync_word: self.sync_word(),
                    payload,
                };
                air.push(AirFrame {
                    family: LORA_AIR,
                    channel: self.channel(),
                    payload: frame.encode(),
                });
                self.transmitted.push(frame);
                self.mode = Mode::Transmit;
                self.tx_end_us = Some(now_us + TX_DURATION_US);
            }
            CMD_SET_TX_CONTINUOUS_WAVE => {
                self.to_standby();
                self.mode = Mode::Transmit;
            }
            CMD_SET_RX => {
                self.to_standby();
                let timeout = param_u24(p, 0);
                self.mode = Mode::Receive;
                self.rx_continuous = timeout == RX_TIMEOUT_INF;
                if timeout != 0 && !self.rx_continuous {
                    let us = (f64::from(timeout) * f64::from(TIMER_STEP_US)) as u64;
                    self.rx_deadline_us = Some(now_us + us);
                }
            }
            CMD_SET_CAD => {
                self.to_standby();
                self.mode = Mode::ChannelActivity;
                self.cad_end_us = Some(now_us + CAD_DURATION_US);
            }
            CMD_WRITE_REGISTER => {
                let addr = param_u16(p, 0);
                for (i, byte) in p.iter().skip(2).enumerate() {
                    self.regs.insert(addr.wrapping_add(i as u16), *byte);
                }
            }
            CMD_WRITE_BUFFER => {
                let offset = usize::from(param(p, 0));
                for (i, byte) in p.iter().skip(1).enumerate() {
                    self.buffer[(offset + i) & 0xFF] = *byte;
                }
            }
            CMD_SET_DIO_IRQ_PARAMS => {
                self.irq_mask = param_u16(p, 0);
                self.dio1_mask = param_u16(p, 2);
            }
            CMD_CLEAR_IRQ_STATUS => self.irq &= !param_u16(p, 0),
            CMD_SET_RF_FREQUENCY => {
                self.frf = u32::from_be_bytes([param(p, 0), param(p, 1), param(p, 2), param(p, 3)]);
            }
            CMD_SET_PACKET_TYPE => self.packet_type = param(p, 0),
            CMD_SET_PACKET_PARAMS => {
                let slots: &mut [u8] = if self.gfsk() {
                    &mut self.fsk_packet
                } else {
                    &mut self.packet
                };
                for (slot, byte) in slots.iter_mut().zip(p) {
                    *slot = *byte;
                }
            }
            CMD_SET_MODULATION_PARAMS => {
                let slots: &mut [u8] = if self.gfsk() {
                    &mut self.fsk_modulation
                } else {
                    &mut self.modulation
                };
                for (slot, byte) in slots.iter_mut().zip(p) {
                    *slot = *byte;
                }
            }
            CMD_SET_BUFFER_BASE_ADDRESS => {
                self.tx_base = param(p, 0);
                self.rx_base = param(p, 1);
            }
            CMD_SET_PA_CONFIG => {
                self.regs.insert(REG_OCP_CONFIGURATION, OCP_AFTER_PA_CONFIG);
            }
            CMD_SET_TX_PARAMS => self.tx_params = [param(p, 0), param(p, 1)],
            CMD_SET_DIO3_AS_TCXO_CTRL => self.tcxo = Some((param(p, 0), param_u24(p, 1))),
            CMD_SET_DIO2_AS_RF_SWITCH_CTRL => self.dio2_rf_switch = param(p, 0) == DIO2_AS_RF_SWITCH,
            CMD_CALIBRATE_IMAGE => self.image_calibration = Some([param(p, 0), param(p, 1)]),
            CMD_CLEAR_DEVICE_ERRORS => self.errors = 0,
            _ => {}
        }
    }

    fn address_accepted(&self, data: &[u8]) -> bool {
        let filter = self.fsk_packet[4];
        if filter == GFSK_ADDRESS_FILT_OFF {
            return true;
        }
        let Some(&addr) = data.first() else {
            return false;
        };
        addr == self.register(REG_NODE_ADDRESS)
            || (filter == GFSK_ADDRESS_FILT_NODE_BROADCAST
                && addr == self.register(REG_BROADCAST_ADDRESS))
    }

    fn hear_fsk(&mut self, air: &AirFrame) {
        if air.family != FSK_AIR || self.mode != Mode::Receive || air.channel != self.fsk_channel()
        {
            return;
        }
        let max = usize::from(self.fsk_packet[6]);
        let data = if self.fsk_variable() {
            let Some((&len, rest)) = air.payload.split_first() else {
                return;
            };
            let len = usize::from(len);
            if len > max || len > rest.len() {
                return;
            }
            &rest[..len]
        } else {
            &air.payload[..max.min(air.payload.len())]
        };
        if !self.address_accepted(data) {
            return;
        }
        for (i, byte) in data.iter().enumerate() {
            self.buffer[(usize::from(self.rx_base) + i) & 0xFF] = *byte;
        }
        self.rx_len = data.len() as u8;
        self.rx_offset = self.rx_base;
        self.stats[0] = self.stats[0].wrapping_add(1);
        let mut flags = IrqFlags::RX_DONE;
        if std::mem::take(&mut self.corrupt_next) && self.fsk_packet[7] != GFSK_CRC_OFF {
            flags |= IrqFlags::CRC_ERR;
            self.stats[1] = self.stats[1].wrapping_add(1);
        }
        self.raise(flags);
        if !self.rx_continuous {
            self.to_standby();
        }
    }

    fn hear(&mut self, air: &AirFrame) {
        if self.gfsk() {
            self.hear_fsk(air);
            return;
        }
        if air.family != LORA_AIR || self.mode != Mode::Receive || air.channel != self.channel() {
            return;
        }
        let Some(frame) = LoraFrame::decode(&air.payload) else {
            return;
        };
        if frame.spreading_factor != self.modulation[0] || frame.sync_word != self.sync_word() {
            return;
        }
        for (i, byte) in frame.payload.iter().enumerate() {
            self.buffer[(usize::from(self.rx_base) + i) & 0xFF] = *byte;
        }
        self.rx_len = frame.payload.len() as u8;
        self.rx_offset = self.rx_base;
        self.stats[0] = self.stats[0].wrapping_add(1);
        let mut flags = IrqFlags::RX_DONE;
        if std::mem::take(&mut self.corrupt_next) && frame.crc {
            flags |= IrqFlags::CRC_ERR;
            self.stats[1] = self.stats[1].wrapping_add(1);
        }
        self.raise(flags);
        if !self.rx_continuous {
            self.to_standby();
        }
    }
}

impl EmulatedRadio for Sx126xEmulator {
    fn select(&mut self, now_us: u64) {
        self.now_us = now_us;
        self.cmd.clear();
        // chip select wakes the chip
        if self.mode == Mode::Sleep {
            self.mode = Mode::StandbyRc;
        }
    }

    fn transfer(&mut self, mosi: u8) -> u8 {
        let idx = self.cmd.len();
        self.cmd.push(mosi);
        let op = self.cmd[0];
        match (op, idx) {
            (CMD_READ_REGISTER, n) if n >= 4 => {
                let addr = u16::from_be_bytes([self.cmd[1], self.cmd[2]]);
                self.register_read(addr.wrapping_add((n - 4) as u16))
            }
            (CMD_READ_BUFFER, n) if n >= 3 => {
                let offset = usize::from(self.cmd[1]);
                self.buffer[(offset + n - 3) & 0xFF]
            }
            (
                CMD_GET_STATUS
                | CMD_GET_IRQ_STATUS
                | CMD_GET_RX_BUFFER_STATUS
                | CMD_GET_PACKET_STATUS
                | CMD_GET_RSSI_INST
                | CMD_GET_DEVICE_ERRORS
                | CMD_GET_STATS,
                n,
            ) if n >= 2 => self.read_reply(op, n - 2),
            _ => self.status(),
        }
    }

    fn deselect(&mut self, now_us: u64, air: &mut Vec<AirFrame>) {
        self.now_us = now_us;
        let cmd = std::mem::take(&mut self.cmd);
        if cmd.is_empty() {
            return;
        }
        self.opcodes.push(cmd[0]);
        self.execute(&cmd, now_us, air);
    }

    fn on_air(&mut self, frame: &AirFrame, now_us: u64) {
        self.now_us = now_us;
        self.hear(frame);
    }

    fn tick(&mut self, now_us: u64) {
        self.now_us = now_us;
        if self.tx_end_us.is_some_and(|end| now_us >= end) {
            self.raise(IrqFlags::TX_DONE);
            self.to_standby();
        }
        if self.rx_deadline_us.is_some_and(|end| now_us >= end) {
            self.raise(IrqFlags::TIMEOUT);
            self.to_standby();
        }
        if self.cad_end_us.is_some_and(|end| now_us >= end) {
            let mut flags = IrqFlags::CAD_DONE;
            if self.channel_busy {
                flags |= IrqFlags::CAD_DETECTED;
            }
            self.raise(flags);
            self.to_standby();
        }
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.inbox.drain(..).partition(|(at, _)| *at <= now_us);
        self.inbox = waiting;
        for (_, frame) in &due {
            self.hear(frame);
        }
    }

    fn reset_line(&mut self, level: Level, _now_us: u64) {
        // active low
        if level == Level::Low {
            self.resets += 1;
            self.power_on();
        }
    }

    fn irq_line(&self) -> Level {
        Level::from(self.irq & self.dio1_mask != 0)
    }

    fn gpio_line(&self) -> Level {
        Level::from(self.busy_stuck || self.mode == Mode::Sleep)
    }
}

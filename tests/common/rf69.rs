//! Register-level model of an RF69 in packet mode.
//!
//! FIFO writes queue bytes for the next transmission. Entering TX sends the whole
//! FIFO as one air frame keyed by the raw FRF value and raises PacketSent after the
//! packet's airtime. A frame heard in RX fills the FIFO and raises PayloadReady (and
//! CrcOk). The RX timeout fires after two 255 x 16-bit windows at the programmed bit
//! rate when `REG_RX_TIMEOUT_2` is non-zero.

use super::{next_noise, FSK_AIR};
use radiophy_rs::chips::rf69::registers::*;
use radiophy_rs::hal::{AirFrame, EmulatedRadio, Level};
use std::collections::VecDeque;

const FIFO_SIZE: usize = 64;
const RX_TIMEOUT_BITS: u64 = 2 * 255 * 16;

pub struct Rf69Emulator {
    regs: [u8; 0x80],
    fifo: VecDeque<u8>,
    addr: Option<u8>,
    write: bool,
    mode_written: bool,
    mode: u8,
    now_us: u64,
    tx_end_us: Option<u64>,
    rx_deadline_us: Option<u64>,
    noise: u8,
    inbox: Vec<(u64, AirFrame)>,
    /// Value reported by the version register
    pub version: u8,
    /// Raw TEMP_2 reading produced by a temperature measurement
    pub temperature_raw: i8,
    /// The next packet received fails its CRC
    pub corrupt_next: bool,
    /// Payloads sent, FIFO contents as transmitted
    pub transmitted: Vec<Vec<u8>>,
    pub resets: u32,
}

impl Default for Rf69Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Rf69Emulator {
    pub fn new() -> Self {
        let mut emu = Self {
            regs: [0; 0x80],
            fifo: VecDeque::new(),
            addr: None,
            write: false,
            mode_written: false,
            mode: MODE_STANDBY,
            now_us: 0,
            tx_end_us: None,
            rx_deadline_us: None,
            noise: 0xA7,
            inbox: Vec::new(),
            version: CHIP_VERSION,
            temperature_raw: -22,
            corrupt_next: false,
            transmitted: Vec::new(),
            resets: 0,
        };
        emu.power_on();
        emu
    }

    fn power_on(&mut self) {
        self.regs = [0; 0x80];
        self.regs[usize::from(REG_OP_MODE)] = MODE_STANDBY;
        self.regs[usize::from(REG_BITRATE_MSB)] = 0x1A;
        self.regs[usize::from(REG_BITRATE_LSB)] = 0x0B;
        self.regs[usize::from(REG_IRQ_FLAGS_1)] = IRQ_MODE_READY;
        self.regs[usize::from(REG_RSSI_VALUE)] = 0x50;
        self.fifo.clear();
        self.mode = MODE_STANDBY;
        self.tx_end_us = None;
        self.rx_deadline_us = None;
    }

    pub fn register(&self, addr: u8) -> u8 {
        self.regs[usize::from(addr & 0x7F)]
    }

    /// Deliver `payload` (raw FIFO image) as if heard `delay_us` from now.
    pub fn schedule_rx(&mut self, payload: &[u8], delay_us: u64) {
        let frame = AirFrame {
            family: FSK_AIR,
            channel: self.frf(),
            payload: payload.to_vec(),
        };
        self.inbox.push((self.now_us + delay_us, frame));
    }

    fn reg(&self, addr: u8) -> u8 {
        self.regs[usize::from(addr)]
    }

    fn frf(&self) -> u32 {
        u32::from_be_bytes([
            0,
            self.reg(REG_FRF_MSB),
            self.reg(REG_FRF_MID),
            self.reg(REG_FRF_LSB),
        ])
    }

    fn bit_rate_raw(&self) -> u64 {
        let raw = u16::from_be_bytes([self.reg(REG_BITRATE_MSB), self.reg(REG_BITRATE_LSB)]);
        u64::from(raw.max(1))
    }

    /// Airtime of `bits` at the programmed bit rate (32 MHz / raw), µs
    fn airtime_us(&self, bits: u64) -> u64 {
        bits * self.bit_rate_raw() / 32
    }

    fn packet_mode(&self) -> bool {
        self.reg(REG_DATA_MODUL) & 0b0110_0000 == DATA_MODE_PACKET
    }

    fn write_reg(&mut self, addr: u8, value: u8) {
        match addr {
            REG_FIFO => {
                if self.fifo.len() < FIFO_SIZE {
                    self.fifo.push_back(value);
                }
            }
            REG_OP_MODE => {
                self.regs[usize::from(addr)] = value;
                self.mode_written = true;
            }
            REG_IRQ_FLAGS_1 => {
                if value & IRQ_TIMEOUT != 0 {
                    self.regs[usize::from(addr)] &= !IRQ_TIMEOUT;
                }
            }
            REG_IRQ_FLAGS_2 => {
                if value & IRQ_FIFO_OVERRUN != 0 {
                    self.fifo.clear();
                    self.regs[usize::from(addr)] = 0;
                }
            }
            REG_TEMP_1 => {
                if value & TEMP_MEAS_START != 0 {
                    self.regs[usize::from(REG_TEMP_2)] = self.temperature_raw as u8;
                }
                self.regs[usize::from(addr)] = value & !(TEMP_MEAS_START | TEMP_MEAS_RUNNING);
            }
            REG_RSSI_CONFIG => {
                if value & RSSI_START != 0 {
                    self.regs[usize::from(addr)] |= RSSI_DONE;
                }
            }
            REG_VERSION => {}
            _ => self.regs[usize::from(addr)] = value,
        }
    }

    fn read_reg(&mut self, addr: u8) -> u8 {
        match addr {
            REG_FIFO => self.fifo.pop_front().unwrap_or(0),
            REG_VERSION => self.version,
            REG_RSSI_VALUE => {
                let noise = next_noise(&mut self.noise);
                (self.reg(addr) & 0xFE) | (noise & 0x01)
            }
            _ => self.reg(addr),
        }
    }

    fn enter_mode(&mut self, now_us: u64, air: &mut Vec<AirFrame>) {
        let mode = self.reg(REG_OP_MODE) & 0b0001_1100;
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        self.tx_end_us = None;
        self.rx_deadline_us = None;
        match mode {
            MODE_TX if self.packet_mode() => {
                let payload: Vec<u8> = self.fifo.drain(..).collect();
                let bits = 8 * (payload.len() as u64 + 8);
                self.tx_end_us = Some(now_us + self.airtime_us(bits));
                self.transmitted.push(payload.clone());
                air.push(AirFrame {
                    family: FSK_AIR,
                    channel: self.frf(),
                    payload,
                });
            }
            MODE_RX if self.reg(REG_RX_TIMEOUT_2) != 0 => {
                self.rx_deadline_us = Some(now_us + self.airtime_us(RX_TIMEOUT_BITS));
            }
            _ => {}
        }
    }

    fn address_accepted(&self, payload: &[u8]) -> bool {
        let filtering = self.reg(REG_PACKET_CONFIG_1) & 0b0000_0110;
        if filtering == ADDRESS_FILTERING_OFF {
            return true;
        }
        let variable = self.reg(REG_PACKET_CONFIG_1) & PACKET_FORMAT_VARIABLE != 0;
        let Some(&addr) = payload.get(usize::from(variable)) else {
            return false;
        };
        addr == self.reg(REG_NODE_ADRS)
            || (filtering == ADDRESS_FILTERING_NODE_BROADCAST
                && addr == self.reg(REG_BROADCAST_ADRS))
    }

    fn hear(&mut self, frame: &AirFrame) {
        if frame.family != FSK_AIR
            || self.mode != MODE_RX
            || !self.packet_mode()
            || frame.channel != self.frf()
            || self.reg(REG_IRQ_FLAGS_2) & IRQ_PAYLOAD_READY != 0
            || !self.address_accepted(&frame.payload)
        {
            return;
        }
        self.fifo = frame.payload.iter().copied().take(FIFO_SIZE).collect();
        let mut flags = IRQ_PAYLOAD_READY;
        if !std::mem::take(&mut self.corrupt_next) {
            flags |= IRQ_CRC_OK;
        }
        self.regs[usize::from(REG_IRQ_FLAGS_2)] |= flags;
        self.rx_deadline_us = None;
    }
}

impl EmulatedRadio for Rf69Emulator {
    fn select(&mut self, now_us: u64) {
        self.now_us = now_us;
    }

    fn transfer(&mut self, mosi: u8) -> u8 {
        let Some(addr) = self.addr else {
            self.addr = Some(mosi & 0x7F);
            self.write = mosi & 0x80 != 0;
            return 0;
        };
        let out = if self.write {
            self.write_reg(addr, mosi);
            0
        } else {
            self.read_reg(addr)
        };
        if addr != REG_FIFO {
            self.addr = Some(addr.wrapping_add(1) & 0x7F);
        }
        out
    }

    fn deselect(&mut self, now_us: u64, air: &mut Vec<AirFrame>) {
        self.now_us = now_us;
        self.addr = None;
        if std::mem::take(&mut self.mode_written) {
            self.enter_mode(now_us, air);
        }
    }

    fn on_air(&mut self, frame: &AirFrame, now_us: u64) {
        self.now_us = now_us;
        self.hear(frame);
    }

    fn tick(&mut self, now_us: u64) {
        self.now_us = now_us;
        if self.tx_end_us.is_some_and(|end| now_us >= end) {
            self.tx_end_us = None;
            self.regs[usize::from(REG_IRQ_FLAGS_2)] |= IRQ_PACKET_SENT;
        }
        if self.rx_deadline_us.is_some_and(|end| now_us >= end) {
            self.rx_deadline_us = None;
            self.regs[usize::from(REG_IRQ_FLAGS_1)] |= IRQ_TIMEOUT;
        }
        let due: Vec<AirFrame> = {
            let (due, waiting): (Vec<_>, Vec<_>) =
                self.inbox.drain(..).partition(|(at, _)| *at <= now_us);
            self.inbox = waiting;
            due.into_iter().map(|(_, frame)| frame).collect()
        };
        for frame in &due {
            self.hear(frame);
        }
    }

    fn reset_line(&mut self, level: Level, _now_us: u64) {
        // active high
        if level == Level::High {
            self.resets += 1;
            self.power_on();
        }
    }

    fn irq_line(&self) -> Level {
        let dio0 = self.reg(REG_DIO_MAPPING_1) & 0b1100_0000;
        let flags = self.reg(REG_IRQ_FLAGS_2);
        let high = match self.mode {
            MODE_TX => dio0 == DIO0_PACKET_SENT && flags & IRQ_PACKET_SENT != 0,
            MODE_RX => dio0 == DIO0_PAYLOAD_READY && flags & IRQ_PAYLOAD_READY != 0,
            _ => false,
        };
        Level::from(high)
    }

    fn gpio_line(&self) -> Level {
        let dio1 = self.reg(REG_DIO_MAPPING_1) & 0b0011_0000;
        Level::from(
            self.mode == MODE_RX
                && dio1 == DIO1_TIMEOUT
                && self.reg(REG_IRQ_FLAGS_1) & IRQ_TIMEOUT != 0,
        )
    }
}

//! Register-level model of an SX127x with its LoRa and FSK pages.
//!
//! LoRa: the FIFO is the chip's 256-byte buffer addressed through
//! `REG_FIFO_ADDR_PTR`. Entering TX sends `PAYLOAD_LENGTH` bytes from the TX base as
//! a LoRa air frame on the carrier in kHz and returns to standby with TxDone. Single
//! reception times out after `SYMB_TIMEOUT` symbols at the programmed spreading
//! factor and bandwidth. CAD completes after one symbol and reports activity when
//! `channel_busy` is set.
//!
//! FSK: FIFO writes queue bytes. Entering TX in packet mode sends the whole FIFO as
//! one air frame keyed by the raw FRF value, the way the RF69 model does, and raises
//! PacketSent after the packet's airtime. A frame heard in RX fills the FIFO and
//! raises PayloadReady and CrcOk.

use super::{channel_khz, next_noise, LoraFrame, FSK_AIR, LORA_AIR};
use radiophy_rs::chips::sx127x::registers::*;
use radiophy_rs::hal::{AirFrame, EmulatedRadio, Level};
use std::collections::VecDeque;

const BANDWIDTHS_KHZ: [f64; 10] = [7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125.0, 250.0, 500.0];
const TX_DURATION_US: u64 = 500;

pub struct Sx127xEmulator {
    regs: [u8; 0x80],
    fifo: [u8; 256],
    fsk_fifo: VecDeque<u8>,
    addr: Option<u8>,
    write: bool,
    mode_written: bool,
    mode: u8,
    now_us: u64,
    tx_end_us: Option<u64>,
    rx_deadline_us: Option<u64>,
    cad_end_us: Option<u64>,
    noise: u8,
    inbox: Vec<(u64, AirFrame)>,
    pub version: u8,
    /// The next packet received fails its payload CRC
    pub corrupt_next: bool,
    /// Channel activity detection reports a preamble
    pub channel_busy: bool,
    /// Raw PKT_RSSI_VALUE for received packets
    pub packet_rssi_raw: u8,
    /// Raw PKT_SNR_VALUE for received packets, quarter dB
    pub packet_snr_raw: i8,
    pub transmitted: Vec<LoraFrame>,
    /// FSK packets sent, FIFO contents as transmitted
    pub transmitted_fsk: Vec<Vec<u8>>,
    pub resets: u32,
}

impl Default for Sx127xEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Sx127xEmulator {
    pub fn new() -> Self {
        let mut emu = Self {
            regs: [0; 0x80],
            fifo: [0; 256],
            fsk_fifo: VecDeque::new(),
            addr: None,
            write: false,
            mode_written: false,
            mode: MODE_STANDBY,
            now_us: 0,
            tx_end_us: None,
            rx_deadline_us: None,
            cad_end_us: None,
            noise: 0x3C,
            inbox: Vec::new(),
            version: CHIP_VERSION,
            corrupt_next: false,
            channel_busy: false,
            packet_rssi_raw: 100,
            packet_snr_raw: 32,
            transmitted: Vec::new(),
            transmitted_fsk: Vec::new(),
            resets: 0,
        };
        emu.power_on();
        emu
    }

    fn power_on(&mut self) {
        self.regs = [0; 0x80];
        self.set(REG_OP_MODE, MODE_STANDBY);
        self.set(REG_MODEM_CONFIG_1, 0x72);
        self.set(REG_MODEM_CONFIG_2, 0x70);
        self.set(REG_SYMB_TIMEOUT_LSB, 0x64);
        self.set(REG_PAYLOAD_LENGTH, 0x01);
        self.set(REG_SYNC_WORD, 0x12);
        self.set(REG_RSSI_VALUE, 0x40);
        self.set(REG_BITRATE_MSB, 0x1A);
        self.set(REG_BITRATE_LSB, 0x0B);
        self.set(REG_RSSI_VALUE_FSK, 0x50);
        self.fifo = [0; 256];
        self.fsk_fifo.clear();
        self.mode = MODE_STANDBY;
        self.tx_end_us = None;
        self.rx_deadline_us = None;
        self.cad_end_us = None;
    }

    pub fn register(&self, addr: u8) -> u8 {
        self.reg(addr & 0x7F)
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

    /// Deliver an FSK `payload` (raw FIFO image) as if heard `delay_us` from now.
    pub fn schedule_rx_fsk(&mut self, payload: &[u8], delay_us: u64) {
        let air = AirFrame {
            family: FSK_AIR,
            channel: self.frf(),
            payload: payload.to_vec(),
        };
        self.inbox.push((self.now_us + delay_us, air));
    }

    /// Current operating mode, OP_MODE bits 2-0
    pub fn mode(&self) -> u8 {
        self.mode
    }

    fn reg(&self, addr: u8) -> u8 {
        self.regs[usize::from(addr)]
    }

    fn set(&mut self, addr: u8, value: u8) {
        self.regs[usize::from(addr)] = value;
    }

    fn lora(&self) -> bool {
        self.reg(REG_OP_MODE) & LORA != 0
    }

    fn frf(&self) -> u32 {
        u32::from_be_bytes([
            0,
            self.reg(REG_FRF_MSB),
            self.reg(REG_FRF_MSB + 1),
            self.reg(REG_FRF_MSB + 2),
        ])
    }

    fn channel(&self) -> u32 {
        channel_khz(self.frf(), 19)
    }

    fn fsk_packet_mode(&self) -> bool {
        self.reg(REG_PACKET_CONFIG_2) & DATA_MODE_PACKET != 0
    }

    /// Airtime of `bits` at the programmed FSK bit rate (32 MHz / raw), µs
    fn fsk_airtime_us(&self, bits: u64) -> u64 {
        let raw = u16::from_be_bytes([self.reg(REG_BITRATE_MSB), self.reg(REG_BITRATE_LSB)]);
        bits * u64::from(raw.max(1)) / 32
    }

    fn spreading_factor(&self) -> u8 {
        self.reg(REG_MODEM_CONFIG_2) >> 4
    }

    fn crc_on(&self) -> bool {
        self.reg(REG_MODEM_CONFIG_2) & RX_CRC_ON != 0
    }

    fn symbol_us(&self) -> u64 {
        let idx = usize::from(self.reg(REG_MODEM_CONFIG_1) >> 4).min(BANDWIDTHS_KHZ.len() - 1);
        let sf = u32::from(self.spreading_factor()).min(12);
        (f64::from(1u32 << sf) * 1000.0 / BANDWIDTHS_KHZ[idx]) as u64
    }

    fn fifo_ptr(&mut self) -> usize {
        let ptr = self.reg(REG_FIFO_ADDR_PTR);
        self.set(REG_FIFO_ADDR_PTR, ptr.wrapping_add(1));
        usize::from(ptr)
    }

    fn write_reg(&mut self, addr: u8, value: u8) {
        match addr {
            REG_FIFO if self.lora() => {
                let ptr = self.fifo_ptr();
                self.fifo[ptr] = value;
            }
            REG_FIFO => self.fsk_fifo.push_back(value),
            REG_OP_MODE => {
                self.set(addr, value);
                self.mode_written = true;
            }
            REG_IRQ_FLAGS if self.lora() => {
                let flags = self.reg(addr) & !value;
                self.set(addr, flags);
            }
            REG_IRQ_FLAGS_1 if !self.lora() => {}
            REG_IRQ_FLAGS_2 if !self.lora() => {
                if value & IRQ_FIFO_OVERRUN != 0 {
                    self.fsk_fifo.clear();
                    self.set(addr, 0);
                }
            }
            REG_VERSION => {}
            _ => self.set(addr, value),
        }
    }

    fn read_reg(&mut self, addr: u8) -> u8 {
        match addr {
            REG_FIFO if self.lora() => {
                let ptr = self.fifo_ptr();
                self.fifo[ptr]
            }
            REG_FIFO => self.fsk_fifo.pop_front().unwrap_or(0),
            REG_VERSION => self.version,
            REG_RSSI_WIDEBAND if self.lora() => next_noise(&mut self.noise),
            REG_RSSI_VALUE_FSK if !self.lora() => {
                let noise = next_noise(&mut self.noise);
                (self.reg(addr) & 0xFE) | (noise & 0x01)
            }
            _ => self.reg(addr),
        }
    }

    fn return_to_standby(&mut self) {
        let op_mode = (self.reg(REG_OP_MODE) & !0b0000_0111) | MODE_STANDBY;
        self.set(REG_OP_MODE, op_mode);
        self.mode = MODE_STANDBY;
        self.rx_deadline_us = None;
    }

    fn raise(&mut self, flags: u8) {
        let current = self.reg(REG_IRQ_FLAGS);
        self.set(REG_IRQ_FLAGS, current | flags);
    }

    fn enter_mode(&mut self, now_us: u64, air: &mut Vec<AirFrame>) {
        let mode = self.reg(REG_OP_MODE) & 0b0000_0111;
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        self.tx_end_us = None;
        self.rx_deadline_us = None;
        self.cad_end_us = None;
        if !self.lora() {
            if mode == MODE_TX && self.fsk_packet_mode() {
                let payload: Vec<u8> = self.fsk_fifo.drain(..).collect();
                let bits = 8 * (payload.len() as u64 + 8);
                self.tx_end_us = Some(now_us + self.fsk_airtime_us(bits));
                self.transmitted_fsk.push(payload.clone());
                air.push(AirFrame {
                    family: FSK_AIR,
                    channel: self.frf(),
                    payload,
                });
            }
            return;
        }
        match mode {
            MODE_TX => {
                let base = usize::from(self.reg(REG_FIFO_TX_BASE_ADDR));
                let len = usize::from(self.reg(REG_PAYLOAD_LENGTH));
                let payload = (0..len).map(|i| self.fifo[(base + i) & 0xFF]).collect();
                let frame = LoraFrame {
                    spreading_factor: self.spreading_factor(),
                    crc: self.crc_on(),
                    sync_word: self.reg(REG_SYNC_WORD),
                    payload,
                };
                air.push(AirFrame {
                    family: LORA_AIR,
                    channel: self.channel(),
                    payload: frame.encode(),
                });
                self.transmitted.push(frame);
                self.tx_end_us = Some(now_us + TX_DURATION_US);
            }
            MODE_RXSINGLE => {
                let symbols = u64::from(self.reg(REG_SYMB_TIMEOUT_LSB))
                    | u64::from(self.reg(REG_MODEM_CONFIG_2) & 0x03) << 8;
                self.rx_deadline_us = Some(now_us + symbols * self.symbol_us());
            }
            MODE_CAD => {
                self.cad_end_us = Some(now_us + self.symbol_us().max(100));
            }
            _ => {}
        }
    }

    fn address_accepted(&self, payload: &[u8]) -> bool {
        let filtering = self.reg(REG_PACKET_CONFIG_1) & 0b0000_0110;
        if filtering == ADDRESS_FILTERING_OFF {
            return true;
        }
        let variable = self.reg(REG_PACKET_CONFIG_1) & PACKET_VARIABLE != 0;
        let Some(&addr) = payload.get(usize::from(variable)) else {
            return false;
        };
        addr == self.reg(REG_NODE_ADRS)
            || (filtering == ADDRESS_FILTERING_NODE_BROADCAST
                && addr == self.reg(REG_BROADCAST_ADRS))
    }

    fn hear_fsk(&mut self, air: &AirFrame) {
        if air.family != FSK_AIR
            || self.mode != MODE_FSK_RX
            || !self.fsk_packet_mode()
            || air.channel != self.frf()
            || self.reg(REG_IRQ_FLAGS_2) & IRQ_PAYLOAD_READY != 0
            || !self.address_accepted(&air.payload)
        {
            return;
        }
        self.fsk_fifo = air.payload.iter().copied().collect();
        let mut flags = IRQ_PAYLOAD_READY;
        if !std::mem::take(&mut self.corrupt_next) {
            flags |= IRQ_CRC_OK;
        }
        let current = self.reg(REG_IRQ_FLAGS_2);
        self.set(REG_IRQ_FLAGS_2, current | flags);
    }

    fn hear(&mut self, air: &AirFrame) {
        if !self.lora() {
            self.hear_fsk(air);
            return;
        }
        let listening = matches!(self.mode, MODE_RXCONTINUOUS | MODE_RXSINGLE);
        if air.family != LORA_AIR || !listening || !self.lora() || air.channel != self.channel() {
            return;
        }
        let Some(frame) = LoraFrame::decode(&air.payload) else {
            return;
        };
        if frame.spreading_factor != self.spreading_factor()
            || frame.sync_word != self.reg(REG_SYNC_WORD)
            || self.reg(REG_IRQ_FLAGS) & IRQ_RX_DONE != 0
        {
            return;
        }
        let base = self.reg(REG_FIFO_RX_BASE_ADDR);
        for (i, byte) in frame.payload.iter().enumerate() {
            self.fifo[(usize::from(base) + i) & 0xFF] = *byte;
        }
        self.set(REG_RX_NB_BYTES, frame.payload.len() as u8);
        self.set(REG_FIFO_RX_CURRENT_ADDR, base);
        self.set(
            REG_HOP_CHANNEL,
            if frame.crc { CRC_ON_PAYLOAD } else { 0 },
        );
        self.set(REG_PKT_RSSI_VALUE, self.packet_rssi_raw);
        self.set(REG_PKT_SNR_VALUE, self.packet_snr_raw as u8);
        let mut flags = IRQ_RX_DONE;
        if std::mem::take(&mut self.corrupt_next) && frame.crc {
            flags |= IRQ_PAYLOAD_CRC_ERROR;
        }
        self.raise(flags);
        if self.mode == MODE_RXSINGLE {
            self.return_to_standby();
        }
    }
}

impl EmulatedRadio for Sx127xEmulator {
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
            if self.lora() {
                self.raise(IRQ_TX_DONE);
                self.return_to_standby();
            } else {
                let current = self.reg(REG_IRQ_FLAGS_2);
                self.set(REG_IRQ_FLAGS_2, current | IRQ_PACKET_SENT);
            }
        }
        if self.rx_deadline_us.is_some_and(|end| now_us >= end) {
            self.raise(IRQ_RX_TIMEOUT);
            self.return_to_standby();
        }
        if self.cad_end_us.is_some_and(|end| now_us >= end) {
            self.cad_end_us = None;
            let mut flags = IRQ_CAD_DONE;
            if self.channel_busy {
                flags |= IRQ_CAD_DETECTED;
            }
            self.raise(flags);
            self.return_to_standby();
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
        if !self.lora() {
            let dio0 = self.reg(REG_DIO_MAPPING_1) & 0b1100_0000;
            let flags = self.reg(REG_IRQ_FLAGS_2);
            let high = match self.mode {
                MODE_TX => dio0 == DIO0_PACKET_SENT && flags & IRQ_PACKET_SENT != 0,
                MODE_FSK_RX => dio0 == DIO0_PAYLOAD_READY && flags & IRQ_PAYLOAD_READY != 0,
                _ => false,
            };
            return Level::from(high);
        }
        let flags = self.reg(REG_IRQ_FLAGS);
        let high = match self.reg(REG_DIO_MAPPING_1) & 0b1100_0000 {
            DIO0_RX_DONE => flags & IRQ_RX_DONE != 0,
            DIO0_TX_DONE => flags & IRQ_TX_DONE != 0,
            DIO0_CAD_DONE => flags & IRQ_CAD_DONE != 0,
            _ => false,
        };
        Level::from(high)
    }

    fn gpio_line(&self) -> Level {
        if !self.lora() {
            return Level::Low;
        }
        let flags = self.reg(REG_IRQ_FLAGS);
        let high = match self.reg(REG_DIO_MAPPING_1) & 0b0011_0000 {
            DIO1_RX_TIMEOUT => flags & IRQ_RX_TIMEOUT != 0,
            DIO1_CAD_DETECTED => flags & IRQ_CAD_DETECTED != 0,
            _ => false,
        };
        Level::from(high)
    }
}

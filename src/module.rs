//! # Bus Transaction Layer
//!
//! [`Module`] is the device handle for one physical chip: it owns the pin assignments
//! and SPI configuration for a single chip-select line and turns logical register and
//! command operations into bus transactions on a shared [`Hal`].
//!
//! ## Register protocol
//!
//! Flat-addressed chips (RF69, SX127x) take one address byte per transaction with the
//! access direction encoded in the MSB (`addr | 0x00` read, `addr | 0x80` write),
//! followed by one or more data bytes. Bit fields are addressed as `[msb:lsb]`
//! ranges; values are passed already shifted into position, matching datasheet
//! register tables.
//!
//! ## Command protocol
//!
//! Command-based chips (SX126x) take an opcode frame followed by parameters and signal
//! readiness on a BUSY line. [`CommandProtocol`] describes the chip's status prefix,
//! status decoding and optional frame CRC. Multi-byte parameters are big-endian on the
//! wire; [`CommandFrame`] performs the conversion from host integers.
//!
//! ## Exclusivity
//!
//! Every transaction is bracketed by a guard that asserts chip select and begins the
//! SPI transaction, and releases both when dropped, including on early return.

use crate::crc::CrcParams;
use crate::error::{RadioError, Result};
use crate::hal::{Edge, Hal, InterruptHandler, Level, PinId, PinMode, SpiSettings, NC};
use crate::logging::log_spi_frame;
use serde::{Deserialize, Serialize};
use std::cell::{RefCell, RefMut};
use std::rc::Rc;

/// Default maximum bytes in one bus transaction (address/opcode included)
pub const MAX_TRANSACTION_LEN: usize = 260;

/// Parameter capacity of a [`CommandFrame`] (opcode included)
pub const COMMAND_FRAME_CAPACITY: usize = 16;

/// Number of GPIOs an RF switch table can drive
pub const RFSWITCH_MAX_PINS: usize = 3;

const TRACE_PREVIEW: usize = 24;

/// Pin assignments of one device. Unused lines are [`NC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulePins {
    /// Chip select (active low)
    pub cs: PinId,
    /// Primary interrupt line (RF69/SX127x DIO0, SX126x DIO1)
    pub irq: PinId,
    /// Reset line
    pub rst: PinId,
    /// Auxiliary line (RF69/SX127x DIO1, SX126x BUSY)
    pub gpio: PinId,
}

impl Default for ModulePins {
    fn default() -> Self {
        Self {
            cs: NC,
            irq: NC,
            rst: NC,
            gpio: NC,
        }
    }
}

impl ModulePins {
    pub fn new(cs: PinId, irq: PinId, rst: PinId, gpio: PinId) -> Self {
        Self { cs, irq, rst, gpio }
    }
}

/// Bus transaction configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    pub settings: SpiSettings,
    /// Per-transaction timeout for BUSY handshakes, in milliseconds
    pub timeout_ms: u32,
    /// OR-ed into the address byte for reads
    pub read_command: u8,
    /// OR-ed into the address byte for writes
    pub write_command: u8,
    /// Longest transaction the device accepts
    pub max_transaction_len: usize,
    /// Read back every field write until it sticks or `check_interval_ms` elapses
    pub verify_writes: bool,
    pub check_interval_ms: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            settings: SpiSettings::default(),
            timeout_ms: 1000,
            read_command: 0x00,
            write_command: 0x80,
            max_transaction_len: MAX_TRANSACTION_LEN,
            verify_writes: false,
            check_interval_ms: 2,
        }
    }
}

/// Logical antenna posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RfSwitchMode {
    Idle,
    Rx,
    Tx,
}

/// GPIO levels to apply for each [`RfSwitchMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfSwitchTable {
    pub pins: [PinId; RFSWITCH_MAX_PINS],
    pub idle: [Level; RFSWITCH_MAX_PINS],
    pub rx: [Level; RFSWITCH_MAX_PINS],
    pub tx: [Level; RFSWITCH_MAX_PINS],
}

impl RfSwitchTable {
    /// Classic RX_EN / TX_EN switch: both low when idle, one high per direction.
    pub fn two_pin(rx_en: PinId, tx_en: PinId) -> Self {
        use Level::{High, Low};
        Self {
            pins: [rx_en, tx_en, NC],
            idle: [Low, Low, Low],
            rx: [High, Low, Low],
            tx: [Low, High, Low],
        }
    }

    pub fn levels(&self, mode: RfSwitchMode) -> &[Level; RFSWITCH_MAX_PINS] {
        match mode {
            RfSwitchMode::Idle => &self.idle,
            RfSwitchMode::Rx => &self.rx,
            RfSwitchMode::Tx => &self.tx,
        }
    }
}

/// Decodes one status byte returned during a command transaction
pub type StatusParser = fn(u8) -> Result<()>;

/// Shape of a command-based chip's SPI protocol
#[derive(Debug, Clone, Copy)]
pub struct CommandProtocol {
    /// Status bytes clocked out between the command and the reply data
    pub status_bytes: usize,
    /// Applied to every status byte and to every byte returned while writing data
    pub parse_status: StatusParser,
    /// Checksum appended to requests and expected after replies
    pub frame_crc: Option<CrcParams>,
}

impl CommandProtocol {
    /// No status prefix, no status checks, no checksum
    pub const RAW: CommandProtocol = CommandProtocol {
        status_bytes: 0,
        parse_status: accept_status,
        frame_crc: None,
    };
}

fn accept_status(_status: u8) -> Result<()> {
    Ok(())
}

/// Direction and buffer of the data phase of a command
pub enum CommandData<'a> {
    Write(&'a [u8]),
    Read(&'a mut [u8]),
}

/// Fixed-capacity command frame built from host-native integers.
///
/// ```rust
/// use radiophy_rs::module::CommandFrame;
///
/// let frame = CommandFrame::new(0x86).u32(0x1B20_0000);
/// assert_eq!(frame.as_bytes(), &[0x86, 0x1B, 0x20, 0x00, 0x00]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    buf: [u8; COMMAND_FRAME_CAPACITY],
    len: usize,
    overflowed: bool,
}

impl CommandFrame {
    pub fn new(opcode: u8) -> Self {
        let mut buf = [0u8; COMMAND_FRAME_CAPACITY];
        buf[0] = opcode;
        Self {
            buf,
            len: 1,
            overflowed: false,
        }
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        if self.len + data.len() > COMMAND_FRAME_CAPACITY {
            self.overflowed = true;
            return self;
        }
        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        self
    }

    pub fn u8(self, value: u8) -> Self {
        self.bytes(&[value])
    }

    pub fn u16(self, value: u16) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    /// Low 24 bits, big-endian
    pub fn u24(self, value: u32) -> Self {
        self.bytes(&value.to_be_bytes()[1..])
    }

    pub fn u32(self, value: u32) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A push exceeded [`COMMAND_FRAME_CAPACITY`]; the frame must not be sent.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }
}

/// Decode a big-endian u16 from the first two bytes of `bytes`
pub fn be_u16(bytes: &[u8]) -> u16 {
    match bytes {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        [lo] => u16::from(*lo),
        [] => 0,
    }
}

/// Scoped bus transaction: chip select low and SPI transaction open until dropped.
struct Transaction<'a, H: Hal> {
    hal: RefMut<'a, H>,
    cs: PinId,
    label: &'static str,
    mosi: [u8; TRACE_PREVIEW],
    miso: [u8; TRACE_PREVIEW],
    count: usize,
}

impl<'a, H: Hal> Transaction<'a, H> {
    fn open(hal: &'a RefCell<H>, cs: PinId, settings: &SpiSettings, label: &'static str) -> Self {
        let mut hal = hal.borrow_mut();
        hal.spi_begin_transaction(settings);
        if cs != NC {
            hal.digital_write(cs, Level::Low);
        }
        Self {
            hal,
            cs,
            label,
            mosi: [0; TRACE_PREVIEW],
            miso: [0; TRACE_PREVIEW],
            count: 0,
        }
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        let reply = self.hal.spi_transfer_byte(byte);
        if self.count < TRACE_PREVIEW {
            self.mosi[self.count] = byte;
            self.miso[self.count] = reply;
        }
        self.count += 1;
        reply
    }
}

impl<H: Hal> Drop for Transaction<'_, H> {
    fn drop(&mut self) {
        if self.cs != NC {
            self.hal.digital_write(self.cs, Level::High);
        }
        self.hal.spi_end_transaction();
        let shown = self.count.min(TRACE_PREVIEW);
        log_spi_frame(self.label, &self.mosi[..shown], &self.miso[..shown]);
    }
}

fn wait_line_low<H: Hal + ?Sized>(hal: &mut H, pin: PinId, timeout_ms: u32) -> Result<()> {
    if pin == NC {
        return Ok(());
    }
    let start = hal.millis();
    while hal.digital_read(pin) == Level::High {
        if hal.millis().saturating_sub(start) >= u64::from(timeout_ms) {
            log::warn!("BUSY line {} still high after {} ms", pin, timeout_ms);
            return Err(RadioError::SpiCommandTimeout);
        }
        hal.yield_now();
    }
    Ok(())
}

/// Device handle: pins, bus configuration and transaction primitives for one chip.
pub struct Module<H: Hal> {
    hal: Rc<RefCell<H>>,
    pins: ModulePins,
    spi: SpiConfig,
    rf_switch: Option<RfSwitchTable>,
    protocol: Option<CommandProtocol>,
}

impl<H: Hal> Module<H> {
    /// Create a handle for the chip behind `pins.cs` on the shared `hal`.
    pub fn new(hal: Rc<RefCell<H>>, pins: ModulePins, spi: SpiConfig) -> Self {
        Self {
            hal,
            pins,
            spi,
            rf_switch: None,
            protocol: None,
        }
    }

    /// Bring up the Hal and the bus and park chip select high.
    pub fn init(&mut self) {
        {
            let mut hal = self.hal.borrow_mut();
            hal.init();
            hal.spi_begin();
        }
        self.pin_mode(self.pins.cs, PinMode::Output);
        self.digital_write(self.pins.cs, Level::High);
        if let Some(table) = self.rf_switch {
            for pin in table.pins {
                self.pin_mode(pin, PinMode::Output);
            }
        }
    }

    /// Release the bus and the Hal.
    pub fn term(&mut self) {
        let mut hal = self.hal.borrow_mut();
        hal.spi_end();
        hal.term();
    }

    pub fn hal(&self) -> Rc<RefCell<H>> {
        Rc::clone(&self.hal)
    }

    pub fn pins(&self) -> &ModulePins {
        &self.pins
    }

    pub fn spi_config(&self) -> &SpiConfig {
        &self.spi
    }

    pub fn set_write_verification(&mut self, enabled: bool, check_interval_ms: u32) {
        self.spi.verify_writes = enabled;
        self.spi.check_interval_ms = check_interval_ms;
    }

    pub fn set_command_protocol(&mut self, protocol: Option<CommandProtocol>) {
        self.protocol = protocol;
    }

    pub fn command_protocol(&self) -> Option<&CommandProtocol> {
        self.protocol.as_ref()
    }

    // ----- pins and timing -----

    pub fn pin_mode(&mut self, pin: PinId, mode: PinMode) {
        if pin == NC {
            return;
        }
        self.hal.borrow_mut().pin_mode(pin, mode);
    }

    pub fn digital_write(&mut self, pin: PinId, level: Level) {
        if pin == NC {
            return;
        }
        self.hal.borrow_mut().digital_write(pin, level);
    }

    pub fn digital_read(&mut self, pin: PinId) -> Level {
        if pin == NC {
            return Level::Low;
        }
        self.hal.borrow_mut().digital_read(pin)
    }

    pub fn attach_interrupt(&mut self, pin: PinId, handler: InterruptHandler, edge: Edge) {
        if pin == NC {
            return;
        }
        self.hal.borrow_mut().attach_interrupt(pin, handler, edge);
    }

    pub fn detach_interrupt(&mut self, pin: PinId) {
        if pin == NC {
            return;
        }
        self.hal.borrow_mut().detach_interrupt(pin);
    }

    pub fn delay(&mut self, ms: u32) {
        self.hal.borrow_mut().delay(ms);
    }

    pub fn delay_us(&mut self, us: u32) {
        self.hal.borrow_mut().delay_microseconds(us);
    }

    pub fn millis(&self) -> u64 {
        self.hal.borrow().millis()
    }

    pub fn micros(&self) -> u64 {
        self.hal.borrow().micros()
    }

    pub fn pulse_in(&mut self, pin: PinId, level: Level, timeout_us: u32) -> u32 {
        if pin == NC {
            return 0;
        }
        self.hal.borrow_mut().pulse_in(pin, level, timeout_us)
    }

    pub fn yield_now(&mut self) {
        self.hal.borrow_mut().yield_now();
    }

    // ----- RF switch -----

    /// Configure a two-pin RX_EN/TX_EN antenna switch.
    pub fn set_rf_switch_pins(&mut self, rx_en: PinId, tx_en: PinId) {
        self.set_rf_switch_table(RfSwitchTable::two_pin(rx_en, tx_en));
    }

    pub fn set_rf_switch_table(&mut self, table: RfSwitchTable) {
        for pin in table.pins {
            self.pin_mode(pin, PinMode::Output);
        }
        self.rf_switch = Some(table);
        self.set_rf_switch_state(RfSwitchMode::Idle);
    }

    pub fn rf_switch_table(&self) -> Option<&RfSwitchTable> {
        self.rf_switch.as_ref()
    }

    /// Drive the switch GPIOs for `mode`; no-op without a table.
    pub fn set_rf_switch_state(&mut self, mode: RfSwitchMode) {
        let Some(table) = self.rf_switch else {
            return;
        };
        for (pin, level) in table.pins.iter().zip(table.levels(mode)) {
            self.digital_write(*pin, *level);
        }
    }

    // ----- register protocol -----

    fn transaction(&self, label: &'static str) -> Transaction<'_, H> {
        Transaction::open(&self.hal, self.pins.cs, &self.spi.settings, label)
    }

    pub fn read_register(&mut self, addr: u8) -> u8 {
        let mut tx = self.transaction("read");
        tx.transfer(addr | self.spi.read_command);
        tx.transfer(0x00)
    }

    pub fn write_register(&mut self, addr: u8, value: u8) {
        let mut tx = self.transaction("write");
        tx.transfer(addr | self.spi.write_command);
        tx.transfer(value);
    }

    /// Bits `[msb:lsb]` of `addr`, left in position.
    pub fn get_register_field(&mut self, addr: u8, msb: u8, lsb: u8) -> Result<u8> {
        check_bit_range(msb, lsb)?;
        let raw = self.read_register(addr);
        let mask = (0xFFu8 << lsb) & (0xFFu8 >> (7 - msb));
        Ok(raw & mask)
    }

    /// Replace bits `[msb:lsb]` of `addr` with the same bits of `value`.
    pub fn set_register_field(&mut self, addr: u8, value: u8, msb: u8, lsb: u8) -> Result<()> {
        self.set_register_field_checked(addr, value, msb, lsb, 0xFF)
    }

    /// Like [`Module::set_register_field`], verifying only the `check_mask` bits.
    ///
    /// Used for registers where some bits change on their own after a write (mode
    /// registers whose ready flags lag the request).
    pub fn set_register_field_checked(
        &mut self,
        addr: u8,
        value: u8,
        msb: u8,
        lsb: u8,
        check_mask: u8,
    ) -> Result<()> {
        check_bit_range(msb, lsb)?;
        let current = self.read_register(addr);
        let mask = field_mask(msb, lsb);
        let updated = (current & !mask) | (value & mask);
        self.write_register(addr, updated);

        if !self.spi.verify_writes {
            return Ok(());
        }
        let start = self.micros();
        let window = u64::from(self.spi.check_interval_ms) * 1000;
        loop {
            let readback = self.read_register(addr);
            if readback & check_mask == updated & check_mask {
                return Ok(());
            }
            if self.micros().saturating_sub(start) >= window {
                log::debug!(
                    "register 0x{:02X}: wrote 0x{:02X}, read 0x{:02X}",
                    addr,
                    updated,
                    readback
                );
                return Err(RadioError::SpiWriteFailed {
                    addr: u16::from(addr),
                });
            }
            self.yield_now();
        }
    }

    /// Whole-register write through the field path (verified when enabled).
    pub fn set_register(&mut self, addr: u8, value: u8) -> Result<()> {
        self.set_register_field(addr, value, 7, 0)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let max = self.spi.max_transaction_len;
        if len > max {
            return Err(RadioError::TransactionTooLong { len, max });
        }
        Ok(())
    }

    pub fn burst_read(&mut self, addr: u8, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len() + 1)?;
        let mut tx = self.transaction("burst read");
        tx.transfer(addr | self.spi.read_command);
        for slot in buf.iter_mut() {
            *slot = tx.transfer(0x00);
        }
        Ok(())
    }

    pub fn burst_write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        self.check_len(data.len() + 1)?;
        let mut tx = self.transaction("burst write");
        tx.transfer(addr | self.spi.write_command);
        for &byte in data {
            tx.transfer(byte);
        }
        Ok(())
    }

    // ----- command protocol -----

    /// Run one command transaction.
    ///
    /// BUSY must be low before chip select is asserted. Write commands send `cmd`
    /// then the data bytes, checking every byte the chip returns while data is
    /// clocked in. Read commands send `cmd`, consume
    /// [`CommandProtocol::status_bytes`] status bytes and fill the reply buffer. With
    /// `wait_for_busy` the BUSY line must drop again after chip select is released.
    pub fn command(&mut self, cmd: &[u8], data: CommandData<'_>, wait_for_busy: bool) -> Result<()> {
        let protocol = self.protocol.unwrap_or(CommandProtocol::RAW);
        let crc_len = protocol.frame_crc.map_or(0, |c| c.byte_len());
        let data_len = match &data {
            CommandData::Write(out) => out.len(),
            CommandData::Read(inp) => inp.len() + protocol.status_bytes,
        };
        self.check_len(cmd.len() + data_len + crc_len)?;

        let busy = self.pins.gpio;
        let timeout_ms = self.spi.timeout_ms;
        // chip select must stay high until the previous command has finished
        wait_line_low(&mut *self.hal.borrow_mut(), busy, timeout_ms)?;
        {
            let mut tx = self.transaction("command");

            let mut status = Ok(());
            let mut crc = protocol.frame_crc.map(|c| (c, c.start()));
            for &byte in cmd {
                tx.transfer(byte);
                if let Some((params, state)) = crc.as_mut() {
                    *state = params.update(*state, byte);
                }
            }

            match data {
                CommandData::Write(out) => {
                    for &byte in out {
                        let reply = tx.transfer(byte);
                        if status.is_ok() {
                            status = (protocol.parse_status)(reply);
                        }
                        if let Some((params, state)) = crc.as_mut() {
                            *state = params.update(*state, byte);
                        }
                    }
                    if let Some((params, state)) = crc {
                        let value = params.finish(state).to_be_bytes();
                        for &byte in &value[4 - params.byte_len()..] {
                            tx.transfer(byte);
                        }
                    }
                }
                CommandData::Read(inp) => {
                    for _ in 0..protocol.status_bytes {
                        let reply = tx.transfer(0x00);
                        if status.is_ok() {
                            status = (protocol.parse_status)(reply);
                        }
                    }
                    for slot in inp.iter_mut() {
                        *slot = tx.transfer(0x00);
                    }
                    if let Some(params) = protocol.frame_crc {
                        let mut trailer = [0u8; 4];
                        let len = params.byte_len();
                        for slot in trailer[..len].iter_mut() {
                            *slot = tx.transfer(0x00);
                        }
                        if status.is_ok() && !params.verify(inp, &trailer[..len]) {
                            status = Err(RadioError::MalformedResponse(format!(
                                "reply checksum mismatch for opcode 0x{:02X}",
                                cmd.first().copied().unwrap_or(0)
                            )));
                        }
                    }
                }
            }
            status?;
        }

        if wait_for_busy {
            self.delay_us(1);
            wait_line_low(&mut *self.hal.borrow_mut(), busy, timeout_ms)?;
        }
        Ok(())
    }

    pub fn write_command(&mut self, cmd: &[u8], data: &[u8]) -> Result<()> {
        self.command(cmd, CommandData::Write(data), true)
    }

    pub fn read_command(&mut self, cmd: &[u8], reply: &mut [u8]) -> Result<()> {
        self.command(cmd, CommandData::Read(reply), true)
    }

    /// Send a parameter frame built with [`CommandFrame`].
    ///
    /// The first byte of the frame is the opcode and the rest is the data phase.
    pub fn send_frame(&mut self, frame: &CommandFrame, wait_for_busy: bool) -> Result<()> {
        if frame.is_overflowed() {
            return Err(RadioError::TransactionTooLong {
                len: COMMAND_FRAME_CAPACITY + 1,
                max: COMMAND_FRAME_CAPACITY,
            });
        }
        let bytes = frame.as_bytes();
        self.command(&bytes[..1], CommandData::Write(&bytes[1..]), wait_for_busy)
    }

    /// Read a big-endian u16 reply.
    pub fn read_command_u16(&mut self, cmd: &[u8]) -> Result<u16> {
        let mut reply = [0u8; 2];
        self.read_command(cmd, &mut reply)?;
        Ok(be_u16(&reply))
    }

    /// Wait for the auxiliary (BUSY) line to drop, bounded by the SPI timeout.
    pub fn wait_busy(&mut self) -> Result<()> {
        let busy = self.pins.gpio;
        let timeout_ms = self.spi.timeout_ms;
        wait_line_low(&mut *self.hal.borrow_mut(), busy, timeout_ms)
    }

    /// Toggle chip select without a transfer and wait for BUSY. A sleeping
    /// command-protocol chip wakes on the falling edge.
    pub fn wake(&mut self) -> Result<()> {
        drop(self.transaction("wake"));
        self.wait_busy()
    }
}

fn check_bit_range(msb: u8, lsb: u8) -> Result<()> {
    if msb > 7 || lsb > 7 || lsb > msb {
        return Err(RadioError::InvalidBitRange { msb, lsb });
    }
    Ok(())
}

/// Mask with ones in `[msb:lsb]`; caller validates the range.
fn field_mask(msb: u8, lsb: u8) -> u8 {
    let upper = (0xFFu16 << (msb + 1)) & 0xFF;
    let lower = 0xFFu16 >> (8 - lsb);
    !(upper | lower) as u8
}

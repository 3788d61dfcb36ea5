//! # Emulated Hal
//!
//! A deterministic, host-side [`Hal`] used for testing chip drivers without hardware.
//!
//! - **Virtual clock**: `delay`, `delay_microseconds` and `yield_now` advance a
//!   microsecond counter; `millis`/`micros` read it. A blocking driver wait therefore
//!   takes no wall-clock time but still observes its deadline.
//! - **Radios**: any number of [`EmulatedRadio`] models can be connected, each bound to
//!   a chip-select pin plus optional IRQ, auxiliary and reset pins. SPI bytes are routed
//!   to whichever radio has its chip select asserted.
//! - **Air**: frames a radio emits when it enters transmit are delivered to every other
//!   connected radio, which decides whether it is listening on the same channel.
//! - **Interrupts**: after every state change the IRQ and auxiliary lines are sampled and
//!   registered handlers fire on matching edges, exactly as a GPIO controller would.
//!
//! ```rust
//! use radiophy_rs::hal::{EmulatedHal, Hal, Level, PinMode};
//!
//! let mut hal = EmulatedHal::new();
//! hal.init();
//! hal.pin_mode(4, PinMode::Output);
//! hal.digital_write(4, Level::High);
//! assert_eq!(hal.digital_read(4), Level::High);
//!
//! hal.delay(5);
//! assert_eq!(hal.millis(), 5);
//! ```

use super::{Edge, Hal, InterruptHandler, Level, PinId, PinMode, SpiSettings, NC};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Default virtual time consumed by one `yield_now` call
pub const DEFAULT_YIELD_STEP_US: u64 = 100;

/// A packet on the emulated air interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame {
    /// Modem family; radios only hear frames of their own family
    pub family: &'static str,
    /// Chip-specific channel key (typically the raw frequency register value)
    pub channel: u32,
    pub payload: Vec<u8>,
}

/// Behavioural model of a radio chip attached to the emulated SPI bus.
pub trait EmulatedRadio {
    /// Chip select asserted
    fn select(&mut self, _now_us: u64) {}

    /// One full-duplex byte exchange while selected
    fn transfer(&mut self, mosi: u8) -> u8;

    /// Chip select released. Frames pushed to `air` are broadcast to the other radios.
    fn deselect(&mut self, now_us: u64, air: &mut Vec<AirFrame>);

    /// A frame transmitted by another radio
    fn on_air(&mut self, _frame: &AirFrame, _now_us: u64) {}

    /// Virtual time advanced
    fn tick(&mut self, _now_us: u64) {}

    /// Write to the reset pin, whether or not the level changed
    fn reset_line(&mut self, _level: Level, _now_us: u64) {}

    /// Level of the primary interrupt output (DIO0 / DIO1)
    fn irq_line(&self) -> Level;

    /// Level of the auxiliary output (second DIO or BUSY)
    fn gpio_line(&self) -> Level {
        Level::Low
    }
}

impl<R: EmulatedRadio> EmulatedRadio for Rc<RefCell<R>> {
    fn select(&mut self, now_us: u64) {
        self.borrow_mut().select(now_us)
    }

    fn transfer(&mut self, mosi: u8) -> u8 {
        self.borrow_mut().transfer(mosi)
    }

    fn deselect(&mut self, now_us: u64, air: &mut Vec<AirFrame>) {
        self.borrow_mut().deselect(now_us, air)
    }

    fn on_air(&mut self, frame: &AirFrame, now_us: u64) {
        self.borrow_mut().on_air(frame, now_us)
    }

    fn tick(&mut self, now_us: u64) {
        self.borrow_mut().tick(now_us)
    }

    fn reset_line(&mut self, level: Level, now_us: u64) {
        self.borrow_mut().reset_line(level, now_us)
    }

    fn irq_line(&self) -> Level {
        self.borrow().irq_line()
    }

    fn gpio_line(&self) -> Level {
        self.borrow().gpio_line()
    }
}

/// Counters exposed for resource-leak and ordering assertions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmulatorStats {
    pub init_calls: u32,
    pub term_calls: u32,
    pub spi_begin_calls: u32,
    pub spi_end_calls: u32,
    pub transactions: u32,
    pub bytes_transferred: u64,
    /// `spi_begin_transaction` while another transaction was open
    pub overlapping_transactions: u32,
    /// Bytes clocked outside any transaction or with the bus down
    pub stray_transfers: u32,
}

#[derive(Debug, Clone, Copy)]
struct PinState {
    mode: PinMode,
    level: Level,
}

struct Slot {
    cs: PinId,
    irq: PinId,
    gpio: PinId,
    rst: PinId,
    radio: Box<dyn EmulatedRadio>,
    selected: bool,
    irq_level: Level,
    gpio_level: Level,
}

/// Emulated platform hosting zero or more radios.
pub struct EmulatedHal {
    initialized: bool,
    spi_active: bool,
    in_transaction: bool,
    now_us: u64,
    yield_step_us: u64,
    lines_muted: bool,
    pins: HashMap<PinId, PinState>,
    handlers: HashMap<PinId, (Edge, InterruptHandler)>,
    slots: Vec<Slot>,
    last_settings: Option<SpiSettings>,
    stats: EmulatorStats,
}

impl Default for EmulatedHal {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedHal {
    pub fn new() -> Self {
        Self {
            initialized: false,
            spi_active: false,
            in_transaction: false,
            now_us: 0,
            yield_step_us: DEFAULT_YIELD_STEP_US,
            lines_muted: false,
            pins: HashMap::new(),
            handlers: HashMap::new(),
            slots: Vec::new(),
            last_settings: None,
            stats: EmulatorStats::default(),
        }
    }

    /// Connect a radio model. Pass [`NC`] for lines that are not wired.
    pub fn connect_radio(
        &mut self,
        cs: PinId,
        irq: PinId,
        gpio: PinId,
        rst: PinId,
        radio: Box<dyn EmulatedRadio>,
    ) {
        let irq_level = radio.irq_line();
        let gpio_level = radio.gpio_line();
        self.slots.push(Slot {
            cs,
            irq,
            gpio,
            rst,
            radio,
            selected: false,
            irq_level,
            gpio_level,
        });
    }

    /// Virtual time consumed by each `yield_now`
    pub fn set_yield_step_us(&mut self, step_us: u64) {
        self.yield_step_us = step_us.max(1);
    }

    /// When muted, radio output lines read low and never raise interrupts.
    pub fn set_lines_muted(&mut self, muted: bool) {
        self.lines_muted = muted;
        self.refresh_lines();
    }

    /// Drive an input pin from "outside" the board, firing any matching handler.
    pub fn set_input_level(&mut self, pin: PinId, level: Level) {
        if pin == NC {
            return;
        }
        let previous = self.pins.get(&pin).map(|p| p.level).unwrap_or(Level::Low);
        self.pins
            .entry(pin)
            .and_modify(|p| p.level = level)
            .or_insert(PinState {
                mode: PinMode::Input,
                level,
            });
        if previous != level {
            self.fire(pin, level);
        }
    }

    /// Level last written to (or read from) a plain GPIO
    pub fn pin_level(&self, pin: PinId) -> Level {
        self.pins.get(&pin).map(|p| p.level).unwrap_or(Level::Low)
    }

    pub fn pin_direction(&self, pin: PinId) -> Option<PinMode> {
        self.pins.get(&pin).map(|p| p.mode)
    }

    pub fn has_interrupt(&self, pin: PinId) -> bool {
        self.handlers.contains_key(&pin)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_spi_active(&self) -> bool {
        self.spi_active
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn last_spi_settings(&self) -> Option<SpiSettings> {
        self.last_settings
    }

    pub fn stats(&self) -> EmulatorStats {
        self.stats
    }

    fn advance(&mut self, us: u64) {
        self.now_us = self.now_us.saturating_add(us);
        let now = self.now_us;
        for slot in &mut self.slots {
            slot.radio.tick(now);
        }
        self.refresh_lines();
    }

    fn fire(&mut self, pin: PinId, level: Level) {
        if let Some((edge, handler)) = self.handlers.get_mut(&pin) {
            let matches = match edge {
                Edge::Rising => level == Level::High,
                Edge::Falling => level == Level::Low,
            };
            if matches {
                handler();
            }
        }
    }

    fn line_level(&self, level: Level) -> Level {
        if self.lines_muted {
            Level::Low
        } else {
            level
        }
    }

    fn refresh_lines(&mut self) {
        let mut edges = Vec::new();
        for idx in 0..self.slots.len() {
            let irq = self.line_level(self.slots[idx].radio.irq_line());
            let gpio = self.line_level(self.slots[idx].radio.gpio_line());
            let slot = &mut self.slots[idx];
            if slot.irq != NC && slot.irq_level != irq {
                edges.push((slot.irq, irq));
            }
            if slot.gpio != NC && slot.gpio_level != gpio {
                edges.push((slot.gpio, gpio));
            }
            slot.irq_level = irq;
            slot.gpio_level = gpio;
        }
        for (pin, level) in edges {
            self.fire(pin, level);
        }
    }

    fn broadcast(&mut self, source: usize, air: Vec<AirFrame>) {
        let now = self.now_us;
        for frame in &air {
            log::trace!(
                "air: {} bytes on {} channel {}",
                frame.payload.len(),
                frame.family,
                frame.channel
            );
            for (idx, slot) in self.slots.iter_mut().enumerate() {
                if idx != source {
                    slot.radio.on_air(frame, now);
                }
            }
        }
    }

    fn chip_select(&mut self, pin: PinId, level: Level) {
        let now = self.now_us;
        let Some(idx) = self.slots.iter().position(|s| s.cs == pin) else {
            return;
        };
        match level {
            Level::Low if !self.slots[idx].selected => {
                self.slots[idx].selected = true;
                self.slots[idx].radio.select(now);
            }
            Level::High if self.slots[idx].selected => {
                self.slots[idx].selected = false;
                let mut air = Vec::new();
                self.slots[idx].radio.deselect(now, &mut air);
                self.broadcast(idx, air);
            }
            _ => {}
        }
        self.refresh_lines();
    }
}

impl Hal for EmulatedHal {
    fn init(&mut self) {
        self.stats.init_calls += 1;
        self.initialized = true;
    }

    fn term(&mut self) {
        self.stats.term_calls += 1;
        self.initialized = false;
    }

    fn pin_mode(&mut self, pin: PinId, mode: PinMode) {
        if pin == NC {
            return;
        }
        self.pins
            .entry(pin)
            .and_modify(|p| p.mode = mode)
            .or_insert(PinState {
                mode,
                level: Level::Low,
            });
    }

    fn digital_write(&mut self, pin: PinId, level: Level) {
        if pin == NC {
            return;
        }
        let previous = self.pins.get(&pin).map(|p| p.level);
        self.pins
            .entry(pin)
            .and_modify(|p| p.level = level)
            .or_insert(PinState {
                mode: PinMode::Output,
                level,
            });
        if previous != Some(level) {
            self.chip_select(pin, level);
        }

        // reset inputs are level-sensitive: every write reaches the radio
        let now = self.now_us;
        let mut reset_any = false;
        for slot in self.slots.iter_mut().filter(|s| s.rst == pin) {
            slot.radio.reset_line(level, now);
            reset_any = true;
        }
        if reset_any {
            self.refresh_lines();
        }
    }

    fn digital_read(&mut self, pin: PinId) -> Level {
        if pin == NC {
            return Level::Low;
        }
        for slot in &self.slots {
            if slot.irq == pin {
                return self.line_level(slot.radio.irq_line());
            }
            if slot.gpio == pin {
                return self.line_level(slot.radio.gpio_line());
            }
        }
        self.pin_level(pin)
    }

    fn attach_interrupt(&mut self, pin: PinId, handler: InterruptHandler, edge: Edge) {
        if pin == NC {
            return;
        }
        self.handlers.insert(pin, (edge, handler));
    }

    fn detach_interrupt(&mut self, pin: PinId) {
        self.handlers.remove(&pin);
    }

    fn delay(&mut self, ms: u32) {
        self.advance(u64::from(ms) * 1000);
    }

    fn delay_microseconds(&mut self, us: u32) {
        self.advance(u64::from(us));
    }

    fn millis(&self) -> u64 {
        self.now_us / 1000
    }

    fn micros(&self) -> u64 {
        self.now_us
    }

    fn pulse_in(&mut self, pin: PinId, level: Level, timeout_us: u32) -> u32 {
        let start = self.now_us;
        while self.digital_read(pin) == level {
            let elapsed = self.now_us - start;
            if elapsed >= u64::from(timeout_us) {
                return 0;
            }
            self.advance(self.yield_step_us.min(u64::from(timeout_us) - elapsed));
        }
        u32::try_from(self.now_us - start).unwrap_or(u32::MAX)
    }

    fn spi_begin(&mut self) {
        self.stats.spi_begin_calls += 1;
        self.spi_active = true;
    }

    fn spi_begin_transaction(&mut self, settings: &SpiSettings) {
        if self.in_transaction {
            log::error!("emulated SPI: transaction started while another is open");
            self.stats.overlapping_transactions += 1;
        }
        self.in_transaction = true;
        self.last_settings = Some(*settings);
        self.stats.transactions += 1;
    }

    fn spi_transfer_byte(&mut self, byte: u8) -> u8 {
        if !self.spi_active || !self.in_transaction {
            log::error!("emulated SPI: byte clocked outside a transaction");
            self.stats.stray_transfers += 1;
        }
        self.stats.bytes_transferred += 1;
        match self.slots.iter_mut().find(|s| s.selected) {
            Some(slot) => slot.radio.transfer(byte),
            // nobody drives MISO
            None => 0x00,
        }
    }

    fn spi_end_transaction(&mut self) {
        self.in_transaction = false;
    }

    fn spi_end(&mut self) {
        self.stats.spi_end_calls += 1;
        self.spi_active = false;
    }

    fn yield_now(&mut self) {
        self.advance(self.yield_step_us);
    }
}

//! # Hardware Abstraction Layer
//!
//! This module defines the [`Hal`] trait that isolates chip drivers from the host
//! platform, and provides the platform implementations:
//!
//! - [`EmulatedHal`]: virtual clock, pin table and SPI routing to emulated radios,
//!   used by the test suite and for host-side development
//! - [`RaspberryPiHal`] (feature `raspberry-pi`): GPIO, SPI and edge interrupts
//!   through `rppal`
//!
//! ## Contract
//!
//! All operations are synchronous and called from normal execution context only.
//! Pin operations on [`NC`] are no-ops; reads of [`NC`] return [`Level::Low`].
//! Interrupt handlers run asynchronously and may only set flags (see
//! [`crate::irq::InterruptFlag`]); they must never block or touch the bus.
//!
//! Pin and bus failures are platform faults. Implementations log them and carry on;
//! only Hal construction reports a [`HalError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod emulated;

#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

pub use emulated::{AirFrame, EmulatedHal, EmulatedRadio};

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::RaspberryPiHal;

/// Host-native pin identifier
pub type PinId = u32;

/// Reserved "not connected" pin sentinel
pub const NC: PinId = u32::MAX;

/// Zero-argument interrupt callback. Runs in interrupt context.
pub type InterruptHandler = Box<dyn FnMut() + Send + 'static>;

/// Errors raised while constructing a platform Hal
#[derive(Debug, Error)]
pub enum HalError {
    #[error("SPI initialization failed: {0}")]
    Spi(String),

    #[error("GPIO initialization failed: {0}")]
    Gpio(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// GPIO direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    Input,
    Output,
}

/// Logic level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Interrupt edge polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    Rising,
    Falling,
}

/// SPI bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// SPI clock polarity/phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpiMode {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

/// Bus transaction settings applied at every `spi_begin_transaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiSettings {
    /// Clock rate in Hz
    pub clock_hz: u32,
    pub bit_order: BitOrder,
    pub mode: SpiMode,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            clock_hz: 2_000_000,
            bit_order: BitOrder::MsbFirst,
            mode: SpiMode::Mode0,
        }
    }
}

/// Platform capability set for GPIO, timing, interrupts and bus transactions.
pub trait Hal {
    /// Acquire bus and GPIO subsystems. Idempotent.
    fn init(&mut self);

    /// Release bus and GPIO subsystems. Idempotent.
    fn term(&mut self);

    fn pin_mode(&mut self, pin: PinId, mode: PinMode);

    fn digital_write(&mut self, pin: PinId, level: Level);

    fn digital_read(&mut self, pin: PinId) -> Level;

    /// Register `handler` to run on `edge` of `pin`, replacing any previous handler.
    ///
    /// The handler executes in interrupt context: it must not block, allocate or
    /// perform bus transactions.
    fn attach_interrupt(&mut self, pin: PinId, handler: InterruptHandler, edge: Edge);

    /// Stop future callback delivery for `pin`.
    fn detach_interrupt(&mut self, pin: PinId);

    fn delay(&mut self, ms: u32);

    fn delay_microseconds(&mut self, us: u32);

    /// Milliseconds since an arbitrary, monotonic origin
    fn millis(&self) -> u64;

    /// Microseconds since an arbitrary, monotonic origin
    fn micros(&self) -> u64;

    /// Block until `pin` leaves `level` or `timeout_us` elapses.
    ///
    /// Returns the time spent at `level` in microseconds, or 0 on timeout.
    fn pulse_in(&mut self, pin: PinId, level: Level, timeout_us: u32) -> u32;

    fn spi_begin(&mut self);

    fn spi_begin_transaction(&mut self, settings: &SpiSettings);

    fn spi_transfer_byte(&mut self, byte: u8) -> u8;

    fn spi_end_transaction(&mut self);

    fn spi_end(&mut self);

    /// Cooperative scheduling checkpoint, called from every polling loop.
    fn yield_now(&mut self) {}
}

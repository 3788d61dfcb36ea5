//! # radiophy-rs - Half-Duplex Radio Transceiver Control Stack
//!
//! The radiophy-rs crate drives sub-GHz packet radios (HopeRF RFM69, Semtech SX127x
//! and SX126x) behind one physical-layer interface, so MAC and session layers can be
//! written once and run on any supported chip.
//!
//! ## Layers
//!
//! - [`hal`]: the platform contract ([`hal::Hal`]) for GPIO, timing, interrupts and
//!   SPI, with an emulated platform for tests and an optional Raspberry Pi backend
//! - [`module`]: the bus transaction layer. One [`Module`] per chip select turns
//!   register and command operations into SPI transactions
//! - [`crc`]: the parameterized CRC engine used for command framing and packet checks
//! - [`chips`]: the chip drivers, one per family
//! - [`phy`]: the [`PhysicalLayer`] trait every driver implements
//! - [`transport`]: the byte-transport seam consumed by connection-oriented protocols
//!
//! ## Usage
//!
//! ```rust,no_run
//! use radiophy_rs::chips::Sx126x;
//! use radiophy_rs::config::Sx126xConfig;
//! use radiophy_rs::hal::EmulatedHal;
//! use radiophy_rs::module::{Module, ModulePins, SpiConfig};
//! use radiophy_rs::phy::PhysicalLayer;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let hal = Rc::new(RefCell::new(EmulatedHal::new()));
//! let module = Module::new(hal, ModulePins::new(8, 24, 25, 23), SpiConfig::default());
//! let mut radio = Sx126x::new(module);
//! radio.begin(&Sx126xConfig::default())?;
//! radio.transmit(b"hello")?;
//! # Ok::<(), radiophy_rs::RadioError>(())
//! ```

pub mod chips;
pub mod config;
pub mod crc;
pub mod error;
pub mod hal;
pub mod irq;
pub mod logging;
pub mod module;
pub mod phy;
pub mod transport;
pub mod util;

pub use crate::error::{ErrorKind, RadioError, Result};
pub use crate::logging::init_logger;

pub use chips::{Rf69, Sx126x, Sx127x, Sx127xVariant};
pub use config::{ChipConfig, ModuleConfig, RadioConfig};
pub use crc::CrcParams;
pub use hal::{Hal, Level, PinId, NC};
pub use module::{Module, ModulePins, SpiConfig};
pub use phy::{ChannelScan, PhysicalLayer, RadioState};
pub use transport::{TransportLayer, TransportProtocol};

/// Crate version, as published
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

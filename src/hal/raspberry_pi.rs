//! # Raspberry Pi HAL Implementation
//!
//! [`Hal`] implementation for Raspberry Pi 4 and 5 using the `rppal` crate.
//!
//! ## Hardware Setup
//!
//! Chip select is driven as an ordinary GPIO by the bus transaction layer so that a
//! transaction can span many single-byte transfers. Wire the radio's NSS to a free
//! GPIO and leave the controller's hardware CE line unconnected.
//!
//! ```text
//! Pi Pin │ BCM GPIO │ Radio Pin │ Function
//! ───────┼──────────┼───────────┼─────────────
//! 19     │ GPIO 10  │ MOSI      │ SPI data out
//! 21     │ GPIO 9   │ MISO      │ SPI data in
//! 23     │ GPIO 11  │ SCK       │ SPI clock
//! 22     │ GPIO 25  │ NSS       │ Chip select (GPIO)
//! 18     │ GPIO 24  │ DIO0/DIO1 │ Interrupt (input)
//! 16     │ GPIO 23  │ DIO1/BUSY │ Auxiliary (input)
//! 15     │ GPIO 22  │ RESET     │ Reset (output)
//! ```
//!
//! SPI must be enabled in `/boot/config.txt` (`dtparam=spi=on`).
//!
//! ```rust,no_run
//! use radiophy_rs::hal::RaspberryPiHal;
//!
//! let hal = RaspberryPiHal::new(0)?;
//! # Ok::<(), radiophy_rs::hal::HalError>(())
//! ```

use super::{
    BitOrder, Edge, Hal, HalError, InterruptHandler, Level, PinId, PinMode, SpiMode, SpiSettings,
    NC,
};
use rppal::gpio::{Gpio, InputPin, Level as GpioLevel, OutputPin, Trigger};
use rppal::spi::{BitOrder as SpiBitOrder, Bus, Mode, SlaveSelect, Spi};
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

/// Delays shorter than this are spun rather than slept
const SPIN_THRESHOLD_US: u32 = 100;

enum PinHandle {
    Input(InputPin),
    Output(OutputPin),
}

/// Raspberry Pi platform Hal
pub struct RaspberryPiHal {
    bus: Bus,
    gpio: Option<Gpio>,
    spi: Option<Spi>,
    pins: HashMap<PinId, PinHandle>,
    settings: Option<SpiSettings>,
    origin: Instant,
}

impl RaspberryPiHal {
    /// Create a Hal for SPI bus 0 (primary) or 1 (auxiliary).
    ///
    /// Peripherals are opened lazily by [`Hal::init`] and [`Hal::spi_begin`].
    pub fn new(spi_bus: u8) -> Result<Self, HalError> {
        let bus = match spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            _ => {
                return Err(HalError::InvalidConfig(format!(
                    "Invalid SPI bus {}, only 0 and 1 are supported",
                    spi_bus
                )))
            }
        };
        Ok(Self {
            bus,
            gpio: None,
            spi: None,
            pins: HashMap::new(),
            settings: None,
            origin: Instant::now(),
        })
    }

    fn bcm(pin: PinId) -> Option<u8> {
        if pin == NC {
            return None;
        }
        match u8::try_from(pin) {
            Ok(p) => Some(p),
            Err(_) => {
                log::error!("GPIO {} is not a valid BCM pin", pin);
                None
            }
        }
    }

    fn apply_settings(spi: &mut Spi, settings: &SpiSettings) {
        let mode = match settings.mode {
            SpiMode::Mode0 => Mode::Mode0,
            SpiMode::Mode1 => Mode::Mode1,
            SpiMode::Mode2 => Mode::Mode2,
            SpiMode::Mode3 => Mode::Mode3,
        };
        let order = match settings.bit_order {
            BitOrder::MsbFirst => SpiBitOrder::MsbFirst,
            BitOrder::LsbFirst => SpiBitOrder::LsbFirst,
        };
        if let Err(e) = spi.set_clock_speed(settings.clock_hz) {
            log::error!("SPI clock {} Hz rejected: {}", settings.clock_hz, e);
        }
        if let Err(e) = spi.set_mode(mode) {
            log::error!("SPI mode rejected: {}", e);
        }
        if let Err(e) = spi.set_bit_order(order) {
            log::error!("SPI bit order rejected: {}", e);
        }
    }
}

impl Hal for RaspberryPiHal {
    fn init(&mut self) {
        if self.gpio.is_some() {
            return;
        }
        match Gpio::new() {
            Ok(gpio) => self.gpio = Some(gpio),
            Err(e) => log::error!("GPIO initialization failed: {}", e),
        }
    }

    fn term(&mut self) {
        self.pins.clear();
        self.gpio = None;
    }

    fn pin_mode(&mut self, pin: PinId, mode: PinMode) {
        let Some(bcm) = Self::bcm(pin) else {
            return;
        };
        match (self.pins.get(&pin), mode) {
            (Some(PinHandle::Input(_)), PinMode::Input) => return,
            (Some(PinHandle::Output(_)), PinMode::Output) => return,
            _ => {}
        }
        // release the old direction before claiming the pin again
        self.pins.remove(&pin);
        let Some(gpio) = self.gpio.as_ref() else {
            log::error!("pin_mode({}) before GPIO init", pin);
            return;
        };
        match gpio.get(bcm) {
            Ok(p) => {
                let handle = match mode {
                    PinMode::Input => PinHandle::Input(p.into_input()),
                    PinMode::Output => PinHandle::Output(p.into_output()),
                };
                self.pins.insert(pin, handle);
            }
            Err(e) => log::error!("GPIO {} unavailable: {}", bcm, e),
        }
    }

    fn digital_write(&mut self, pin: PinId, level: Level) {
        if pin == NC {
            return;
        }
        match self.pins.get_mut(&pin) {
            Some(PinHandle::Output(p)) => match level {
                Level::High => p.set_high(),
                Level::Low => p.set_low(),
            },
            _ => log::warn!("digital_write on GPIO {} which is not an output", pin),
        }
    }

    fn digital_read(&mut self, pin: PinId) -> Level {
        match self.pins.get(&pin) {
            Some(PinHandle::Input(p)) => Level::from(p.read() == GpioLevel::High),
            Some(PinHandle::Output(p)) => Level::from(p.is_set_high()),
            None => Level::Low,
        }
    }

    fn attach_interrupt(&mut self, pin: PinId, mut handler: InterruptHandler, edge: Edge) {
        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
        };
        match self.pins.get_mut(&pin) {
            Some(PinHandle::Input(p)) => {
                if let Err(e) = p.set_async_interrupt(trigger, move |_level| handler()) {
                    log::error!("Failed to attach interrupt on GPIO {}: {}", pin, e);
                }
            }
            _ => log::warn!("attach_interrupt on GPIO {} which is not an input", pin),
        }
    }

    fn detach_interrupt(&mut self, pin: PinId) {
        if let Some(PinHandle::Input(p)) = self.pins.get_mut(&pin) {
            if let Err(e) = p.clear_async_interrupt() {
                log::error!("Failed to detach interrupt on GPIO {}: {}", pin, e);
            }
        }
    }

    fn delay(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn delay_microseconds(&mut self, us: u32) {
        if us >= SPIN_THRESHOLD_US {
            thread::sleep(Duration::from_micros(u64::from(us)));
            return;
        }
        let start = Instant::now();
        let target = Duration::from_micros(u64::from(us));
        while start.elapsed() < target {
            std::hint::spin_loop();
        }
    }

    fn millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn micros(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn pulse_in(&mut self, pin: PinId, level: Level, timeout_us: u32) -> u32 {
        let start = Instant::now();
        let timeout = Duration::from_micros(u64::from(timeout_us));
        while self.digital_read(pin) == level {
            if start.elapsed() >= timeout {
                return 0;
            }
            thread::yield_now();
        }
        u32::try_from(start.elapsed().as_micros()).unwrap_or(u32::MAX)
    }

    fn spi_begin(&mut self) {
        if self.spi.is_some() {
            return;
        }
        let defaults = SpiSettings::default();
        match Spi::new(self.bus, SlaveSelect::Ss0, defaults.clock_hz, Mode::Mode0) {
            Ok(spi) => self.spi = Some(spi),
            Err(e) => log::error!("SPI initialization failed: {}", e),
        }
    }

    fn spi_begin_transaction(&mut self, settings: &SpiSettings) {
        if self.settings.as_ref() == Some(settings) {
            return;
        }
        if let Some(spi) = self.spi.as_mut() {
            Self::apply_settings(spi, settings);
            self.settings = Some(*settings);
        }
    }

    fn spi_transfer_byte(&mut self, byte: u8) -> u8 {
        let Some(spi) = self.spi.as_ref() else {
            log::error!("SPI transfer before spi_begin");
            return 0x00;
        };
        let mut read = [0u8; 1];
        if let Err(e) = spi.transfer(&mut read, &[byte]) {
            log::error!("SPI transfer failed: {}", e);
        }
        read[0]
    }

    fn spi_end_transaction(&mut self) {}

    fn spi_end(&mut self) {
        self.spi = None;
        self.settings = None;
    }

    fn yield_now(&mut self) {
        thread::yield_now();
    }
}

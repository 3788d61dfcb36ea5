//! # Chip Drivers
//!
//! One driver per transceiver family, each implementing [`crate::phy::PhysicalLayer`]:
//!
//! - [`rf69`]: HopeRF RFM69 / Semtech SX1231 FSK/OOK transceivers (register protocol)
//! - [`sx127x`]: Semtech SX1276/77/78/79 LoRa and FSK/OOK transceivers (register protocol)
//! - [`sx126x`]: Semtech SX1262 LoRa and GFSK transceiver (command protocol with BUSY line)
//!
//! Drivers share [`ChipCore`]: the device handle, driver state, cached settings, the
//! pending-interrupt flag and the bounded wait used by every blocking operation.

pub mod rf69;
pub mod sx126x;
pub mod sx127x;

pub use rf69::Rf69;
pub use sx126x::Sx126x;
pub use sx127x::{Sx127x, Sx127xVariant};

use crate::error::{RadioError, Result};
use crate::hal::{Edge, Hal, InterruptHandler, Level, PinMode};
use crate::irq::InterruptFlag;
use crate::module::Module;
use crate::phy::{LinkSettings, Modem, RadioState};

/// Identification attempts before `begin` gives up
pub const CHIP_ID_ATTEMPTS: u8 = 10;

/// Delay between identification attempts, ms
pub const CHIP_ID_RETRY_DELAY_MS: u32 = 10;

/// Result of a bounded wait on the interrupt lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Primary IRQ line (or its pending flag) fired
    Done,
    /// Auxiliary line fired first (hardware timeout on RF69/SX127x DIO1)
    AuxSignalled,
    /// Software deadline elapsed
    TimedOut,
}

/// State shared by every chip driver
pub struct ChipCore<H: Hal> {
    pub(crate) module: Module<H>,
    pub(crate) state: RadioState,
    pub(crate) settings: LinkSettings,
    pub(crate) ready: bool,
    pub(crate) pending: InterruptFlag,
    pub(crate) data_rate: f32,
    name: &'static str,
}

impl<H: Hal> ChipCore<H> {
    pub(crate) fn new(module: Module<H>, name: &'static str) -> Self {
        Self {
            module,
            state: RadioState::Standby,
            settings: LinkSettings::default(),
            ready: false,
            pending: InterruptFlag::new(),
            data_rate: 0.0,
            name,
        }
    }

    pub(crate) fn set_state(&mut self, state: RadioState) {
        if self.state != state {
            log::debug!("{}: {} -> {}", self.name, self.state, state);
        }
        self.state = state;
    }

    /// Poll `identify` up to [`CHIP_ID_ATTEMPTS`] times. On exhaustion the bus is
    /// released and `ChipNotFound` returned.
    pub(crate) fn find_chip<F>(&mut self, mut identify: F) -> Result<()>
    where
        F: FnMut(&mut Module<H>) -> bool,
    {
        for attempt in 1..=CHIP_ID_ATTEMPTS {
            if identify(&mut self.module) {
                log::debug!("{}: identified on attempt {}", self.name, attempt);
                return Ok(());
            }
            self.module.delay(CHIP_ID_RETRY_DELAY_MS);
        }
        log::error!(
            "{}: no chip found after {} attempts",
            self.name,
            CHIP_ID_ATTEMPTS
        );
        self.module.term();
        Err(RadioError::ChipNotFound {
            attempts: CHIP_ID_ATTEMPTS,
        })
    }

    /// Route the IRQ line into the pending flag.
    pub(crate) fn attach_irq(&mut self) {
        let pins = *self.module.pins();
        self.module.pin_mode(pins.irq, PinMode::Input);
        self.module.pin_mode(pins.gpio, PinMode::Input);
        self.module
            .attach_interrupt(pins.irq, self.pending.handler(), Edge::Rising);
    }

    pub(crate) fn attach_irq_action(&mut self, action: InterruptHandler) {
        let irq = self.module.pins().irq;
        self.module
            .attach_interrupt(irq, self.pending.handler_with(action), Edge::Rising);
    }

    /// Wait for the IRQ line, or with `watch_aux` also the auxiliary line, for at most
    /// `timeout_us`. Yields on every poll.
    pub(crate) fn wait_irq(&mut self, timeout_us: u64, watch_aux: bool) -> WaitOutcome {
        let pins = *self.module.pins();
        let start = self.module.micros();
        loop {
            if self.pending.take() || self.module.digital_read(pins.irq) == Level::High {
                return WaitOutcome::Done;
            }
            if watch_aux && self.module.digital_read(pins.gpio) == Level::High {
                return WaitOutcome::AuxSignalled;
            }
            if self.module.micros().saturating_sub(start) >= timeout_us {
                return WaitOutcome::TimedOut;
            }
            self.module.yield_now();
        }
    }

    /// `WrongModem` unless the chip is configured for `modem`.
    pub(crate) fn require_modem(&self, modem: Modem) -> Result<()> {
        if self.settings.modem != modem {
            log::debug!("{}: {} operation in {} mode", self.name, modem, self.settings.modem);
            return Err(RadioError::WrongModem);
        }
        Ok(())
    }

    pub(crate) fn record_data_rate(&mut self, bytes: usize, elapsed_us: u64) {
        if elapsed_us > 0 {
            self.data_rate = (bytes as f32 * 8.0 * 1_000_000.0) / elapsed_us as f32;
        }
    }

    pub(crate) fn settings(&self) -> Option<&LinkSettings> {
        self.ready.then_some(&self.settings)
    }

    pub fn module(&self) -> &Module<H> {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module<H> {
        &mut self.module
    }
}

/// Airtime of `bits` at `bit_rate_kbps`, µs
pub(crate) fn fsk_airtime_us(bits: usize, bit_rate_kbps: f32) -> u64 {
    if bit_rate_kbps <= 0.0 {
        return 0;
    }
    (bits as f32 * 1000.0 / bit_rate_kbps) as u64
}

/// FSK receiver bandwidths (kHz) and their RX_BW mantissa/exponent bits. The RF69
/// and SX127x FSK register maps share this encoding.
const FSK_RX_BANDWIDTHS: [(f32, u8); 24] = [
    (2.6, 0x17),
    (3.1, 0x0F),
    (3.9, 0x07),
    (5.2, 0x16),
    (6.3, 0x0E),
    (7.8, 0x06),
    (10.4, 0x15),
    (12.5, 0x0D),
    (15.6, 0x05),
    (20.8, 0x14),
    (25.0, 0x0C),
    (31.3, 0x04),
    (41.7, 0x13),
    (50.0, 0x0B),
    (62.5, 0x03),
    (83.3, 0x12),
    (100.0, 0x0A),
    (125.0, 0x02),
    (166.7, 0x11),
    (200.0, 0x09),
    (250.0, 0x01),
    (333.3, 0x10),
    (400.0, 0x08),
    (500.0, 0x00),
];

/// RX_BW bits 4-0 for `rx_bw_khz`, `None` when not in the table
pub(crate) fn fsk_rx_bandwidth_bits(rx_bw_khz: f32) -> Option<u8> {
    FSK_RX_BANDWIDTHS
        .iter()
        .find(|(bw, _)| (bw - rx_bw_khz).abs() < 0.05)
        .map(|&(_, bits)| bits)
}

/// LoRa symbol duration, µs
pub(crate) fn lora_symbol_us(sf: u8, bandwidth_khz: f32) -> f32 {
    if bandwidth_khz <= 0.0 {
        return 0.0;
    }
    (1u32 << sf) as f32 * 1000.0 / bandwidth_khz
}

/// Parameters of a LoRa time-on-air computation
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoraAirtime {
    pub sf: u8,
    pub bandwidth_khz: f32,
    pub coding_rate: u8,
    pub preamble: u16,
    pub explicit_header: bool,
    pub crc: bool,
    pub low_data_rate: bool,
}

impl LoraAirtime {
    /// Time on air of a `len`-byte payload, µs
    pub fn time_on_air_us(&self, len: usize) -> u64 {
        if self.bandwidth_khz <= 0.0 {
            return 0;
        }
        let sf = f32::from(self.sf);
        let symbol = lora_symbol_us(self.sf, self.bandwidth_khz);
        let de = if self.low_data_rate { 1.0 } else { 0.0 };
        let ih = if self.explicit_header { 0.0 } else { 1.0 };
        let crc = if self.crc { 1.0 } else { 0.0 };
        let numerator = 8.0 * len as f32 - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * ih;
        let denominator = 4.0 * (sf - 2.0 * de);
        let payload_symbols =
            8.0 + ((numerator / denominator).ceil() * f32::from(self.coding_rate)).max(0.0);
        let preamble_symbols = f32::from(self.preamble) + 4.25;
        ((preamble_symbols + payload_symbols) * symbol) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lora_time_on_air_reference() {
        // SF9 / 125 kHz / CR 4/7 / 8 preamble symbols / explicit header / CRC:
        // 20-byte payload takes 43 payload symbols, 4.096 ms each
        let airtime = LoraAirtime {
            sf: 9,
            bandwidth_khz: 125.0,
            coding_rate: 7,
            preamble: 8,
            explicit_header: true,
            crc: true,
            low_data_rate: false,
        };
        let toa = airtime.time_on_air_us(20);
        let expected = ((8.0 + 4.25 + 8.0 + 35.0) * 4096.0) as u64;
        assert_eq!(toa, expected);
    }

    #[test]
    fn test_fsk_rx_bandwidth_bits() {
        assert_eq!(fsk_rx_bandwidth_bits(2.6), Some(0x17));
        assert_eq!(fsk_rx_bandwidth_bits(83.3), Some(0x12));
        assert_eq!(fsk_rx_bandwidth_bits(500.0), Some(0x00));
        assert_eq!(fsk_rx_bandwidth_bits(120.0), None);
    }

    #[test]
    fn test_fsk_airtime() {
        assert_eq!(fsk_airtime_us(480, 48.0), 10_000);
        assert_eq!(fsk_airtime_us(8, 0.0), 0);
    }
}

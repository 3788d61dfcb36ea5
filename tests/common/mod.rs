//! Shared fixtures for the integration tests: behavioural chip models and the
//! board wiring used to attach them to an [`EmulatedHal`].

#![allow(dead_code)]

pub mod rf69;
pub mod sx126x;
pub mod sx127x;

use radiophy_rs::hal::{EmulatedHal, EmulatedRadio};
use radiophy_rs::module::{Module, ModulePins, SpiConfig};
use std::cell::RefCell;
use std::rc::Rc;

pub use self::rf69::Rf69Emulator;
pub use self::sx126x::Sx126xEmulator;
pub use self::sx127x::Sx127xEmulator;

pub type SharedHal = Rc<RefCell<EmulatedHal>>;

/// Air family shared by the LoRa models
pub const LORA_AIR: &str = "lora";

/// Air family of the FSK models
pub const FSK_AIR: &str = "fsk";

pub fn init_logging() {
    radiophy_rs::logging::init_test_logger();
}

pub fn new_hal() -> SharedHal {
    init_logging();
    Rc::new(RefCell::new(EmulatedHal::new()))
}

/// Wiring of the first radio on the test board
pub fn pins_a() -> ModulePins {
    ModulePins::new(8, 24, 25, 23)
}

/// Wiring of the second radio on the test board
pub fn pins_b() -> ModulePins {
    ModulePins::new(7, 22, 17, 27)
}

/// Attach `radio` to the board, keeping a handle for inspection.
pub fn connect<R: EmulatedRadio + 'static>(
    hal: &SharedHal,
    pins: ModulePins,
    radio: R,
) -> Rc<RefCell<R>> {
    let shared = Rc::new(RefCell::new(radio));
    hal.borrow_mut().connect_radio(
        pins.cs,
        pins.irq,
        pins.gpio,
        pins.rst,
        Box::new(shared.clone()),
    );
    shared
}

pub fn module(hal: &SharedHal, pins: ModulePins) -> Module<EmulatedHal> {
    Module::new(hal.clone(), pins, SpiConfig::default())
}

/// Carrier in kHz from a synthesizer word, `frf * 32 MHz / 2^exponent`, rounded.
///
/// Both LoRa families key their air channel by this value so they hear each other.
pub fn channel_khz(frf: u32, exponent: u32) -> u32 {
    let scaled = u64::from(frf) * 32_000 + (1u64 << (exponent - 1));
    (scaled >> exponent) as u32
}

/// Air-level view of a LoRa packet: what both sides must agree on to hear it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoraFrame {
    pub spreading_factor: u8,
    pub crc: bool,
    pub sync_word: u8,
    pub payload: Vec<u8>,
}

impl LoraFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.spreading_factor, u8::from(self.crc), self.sync_word];
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        match raw {
            [sf, flags, sync, payload @ ..] => Some(Self {
                spreading_factor: *sf,
                crc: flags & 0x01 != 0,
                sync_word: *sync,
                payload: payload.to_vec(),
            }),
            _ => None,
        }
    }
}

/// Small xorshift used for RSSI noise in the models
pub fn next_noise(state: &mut u8) -> u8 {
    let mut x = *state;
    x ^= x << 3;
    x ^= x >> 5;
    x ^= x << 4;
    if x == 0 {
        x = 0x5B;
    }
    *state = x;
    x
}

//! # Radio Configuration
//!
//! Serializable descriptions of a device handle and of each chip family's `begin`
//! parameters. Every struct implements `Default` with the chip's power-on begin
//! parameters and uses `#[serde(default)]`, so a JSON document only needs the fields
//! it changes:
//!
//! ```rust
//! use radiophy_rs::config::{ChipConfig, RadioConfig};
//!
//! let json = r#"{
//!     "module": { "pins": { "cs": 8, "irq": 24, "rst": 25, "gpio": 23 } },
//!     "chip": { "chip": "sx126x", "frequency_mhz": 868.1, "spreading_factor": 7 }
//! }"#;
//! let config = RadioConfig::from_json_str(json).unwrap();
//! match config.chip {
//!     ChipConfig::Sx126x(chip) => {
//!         assert_eq!(chip.spreading_factor, 7);
//!         assert_eq!(chip.bandwidth_khz, 125.0);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use crate::chips::sx127x::Sx127xVariant;
use crate::error::{RadioError, Result};
use crate::hal::{Hal, PinId};
use crate::module::{Module, ModulePins, RfSwitchTable, SpiConfig};
use crate::phy::{DataShaping, Encoding, PacketLengthMode};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Antenna switch wiring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RfSwitchConfig {
    /// RX_EN / TX_EN pair
    TwoPin { rx_en: PinId, tx_en: PinId },
    /// Arbitrary table of up to three GPIOs
    Table(RfSwitchTable),
}

impl RfSwitchConfig {
    pub fn table(&self) -> RfSwitchTable {
        match *self {
            RfSwitchConfig::TwoPin { rx_en, tx_en } => RfSwitchTable::two_pin(rx_en, tx_en),
            RfSwitchConfig::Table(table) => table,
        }
    }
}

/// Device handle description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub pins: ModulePins,
    pub spi: SpiConfig,
    pub rf_switch: Option<RfSwitchConfig>,
}

impl ModuleConfig {
    /// Build the device handle on a shared Hal.
    pub fn build<H: Hal>(&self, hal: Rc<RefCell<H>>) -> Module<H> {
        let mut module = Module::new(hal, self.pins, self.spi);
        if let Some(rf_switch) = self.rf_switch {
            module.set_rf_switch_table(rf_switch.table());
        }
        module
    }
}

/// RF69 `begin` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rf69Config {
    pub frequency_mhz: f32,
    pub bit_rate_kbps: f32,
    pub frequency_deviation_khz: f32,
    pub rx_bandwidth_khz: f32,
    pub output_power_dbm: i8,
    pub preamble_length: u16,
    /// Module is an RFM69H(C)W with the PA_BOOST output
    pub high_power: bool,
    /// Written as hex text, `"2d01"`
    #[serde(with = "hex_bytes")]
    pub sync_word: Vec<u8>,
    /// Bit errors tolerated in the sync word
    pub sync_max_errors: u8,
    pub packet_length: PacketLengthMode,
    pub crc: bool,
    pub shaping: DataShaping,
    pub encoding: Encoding,
    pub ook: bool,
    pub node_address: Option<u8>,
    pub broadcast_address: Option<u8>,
    /// 32 hex digits
    #[serde(with = "hex_key")]
    pub aes_key: Option<[u8; 16]>,
}

impl Default for Rf69Config {
    fn default() -> Self {
        Self {
            frequency_mhz: 434.0,
            bit_rate_kbps: 48.0,
            frequency_deviation_khz: 50.0,
            rx_bandwidth_khz: 125.0,
            output_power_dbm: 10,
            preamble_length: 16,
            high_power: false,
            sync_word: vec![0x2D, 0x01],
            sync_max_errors: 0,
            packet_length: PacketLengthMode::Variable { max: 64 },
            crc: true,
            shaping: DataShaping::None,
            encoding: Encoding::Nrz,
            ook: false,
            node_address: None,
            broadcast_address: None,
            aes_key: None,
        }
    }
}

mod hex_bytes {
    use crate::util::hex::{decode_hex, encode_hex};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode_hex(&text).map_err(D::Error::custom)
    }
}

mod hex_key {
    use crate::util::hex::{decode_hex, encode_hex};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<[u8; 16]>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_some(&encode_hex(key)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 16]>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let bytes = decode_hex(&text).map_err(D::Error::custom)?;
        let key = <[u8; 16]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::invalid_length(bytes.len(), &"16 key bytes"))?;
        Ok(Some(key))
    }
}

/// SX127x `begin` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sx127xConfig {
    pub variant: Sx127xVariant,
    pub frequency_mhz: f32,
    pub bandwidth_khz: f32,
    pub spreading_factor: u8,
    /// Denominator of the 4/x coding rate
    pub coding_rate: u8,
    pub sync_word: u8,
    pub output_power_dbm: i8,
    /// Use the RFO pin instead of PA_BOOST
    pub use_rfo: bool,
    pub preamble_length: u16,
    /// LNA gain 1 (highest) to 6, 0 enables AGC
    pub gain: u8,
    pub current_limit_ma: u8,
    pub crc: bool,
    pub explicit_header: bool,
    /// Packet length used when `explicit_header` is off
    pub implicit_length: u8,
}

impl Default for Sx127xConfig {
    fn default() -> Self {
        Self {
            variant: Sx127xVariant::Sx1278,
            frequency_mhz: 434.0,
            bandwidth_khz: 125.0,
            spreading_factor: 9,
            coding_rate: 7,
            sync_word: 0x12,
            output_power_dbm: 10,
            use_rfo: false,
            preamble_length: 8,
            gain: 0,
            current_limit_ma: 60,
            crc: true,
            explicit_header: true,
            implicit_length: 0xFF,
        }
    }
}

/// SX127x FSK/OOK `begin_fsk` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sx127xFskConfig {
    pub variant: Sx127xVariant,
    pub frequency_mhz: f32,
    pub bit_rate_kbps: f32,
    pub frequency_deviation_khz: f32,
    /// Receiver and AFC bandwidth
    pub rx_bandwidth_khz: f32,
    pub output_power_dbm: i8,
    /// Use the RFO pin instead of PA_BOOST
    pub use_rfo: bool,
    /// Preamble length in bits
    pub preamble_length: u16,
    /// Written as hex text, `"12ad"`
    #[serde(with = "hex_bytes")]
    pub sync_word: Vec<u8>,
    pub current_limit_ma: u8,
    pub ook: bool,
    pub packet_length: PacketLengthMode,
    pub crc: bool,
    pub shaping: DataShaping,
    pub encoding: Encoding,
    pub node_address: Option<u8>,
    pub broadcast_address: Option<u8>,
}

impl Default for Sx127xFskConfig {
    fn default() -> Self {
        Self {
            variant: Sx127xVariant::Sx1278,
            frequency_mhz: 434.0,
            bit_rate_kbps: 4.8,
            frequency_deviation_khz: 5.0,
            rx_bandwidth_khz: 125.0,
            output_power_dbm: 10,
            use_rfo: false,
            preamble_length: 16,
            sync_word: vec![0x12, 0xAD],
            current_limit_ma: 60,
            ook: false,
            packet_length: PacketLengthMode::Variable { max: 64 },
            crc: true,
            shaping: DataShaping::None,
            encoding: Encoding::Nrz,
            node_address: None,
            broadcast_address: None,
        }
    }
}

/// SX126x `begin` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sx126xConfig {
    pub frequency_mhz: f32,
    pub bandwidth_khz: f32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub sync_word: u8,
    pub output_power_dbm: i8,
    pub preamble_length: u16,
    /// TCXO supply on DIO3 in volts, 0 for a plain crystal
    pub tcxo_voltage: f32,
    pub use_regulator_ldo: bool,
    pub current_limit_ma: f32,
    /// DIO2 drives the antenna switch
    pub dio2_rf_switch: bool,
    pub crc: bool,
    pub explicit_header: bool,
    /// Packet length used when `explicit_header` is off
    pub implicit_length: u8,
}

impl Default for Sx126xConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 434.0,
            bandwidth_khz: 125.0,
            spreading_factor: 9,
            coding_rate: 7,
            sync_word: 0x12,
            output_power_dbm: 10,
            preamble_length: 8,
            tcxo_voltage: 1.6,
            use_regulator_ldo: false,
            current_limit_ma: 60.0,
            dio2_rf_switch: false,
            crc: true,
            explicit_header: true,
            implicit_length: 0xFF,
        }
    }
}

/// SX126x GFSK `begin_fsk` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sx126xFskConfig {
    pub frequency_mhz: f32,
    pub bit_rate_kbps: f32,
    pub frequency_deviation_khz: f32,
    pub rx_bandwidth_khz: f32,
    pub output_power_dbm: i8,
    /// Preamble length in bits
    pub preamble_length: u16,
    /// Written as hex text, `"2d01"`
    #[serde(with = "hex_bytes")]
    pub sync_word: Vec<u8>,
    /// TCXO supply on DIO3 in volts, 0 for a plain crystal
    pub tcxo_voltage: f32,
    pub use_regulator_ldo: bool,
    pub current_limit_ma: f32,
    /// DIO2 drives the antenna switch
    pub dio2_rf_switch: bool,
    pub packet_length: PacketLengthMode,
    /// Two-byte inverted CCITT CRC
    pub crc: bool,
    pub shaping: DataShaping,
    /// `Nrz` or `Whitening`
    pub encoding: Encoding,
    pub node_address: Option<u8>,
    pub broadcast_address: Option<u8>,
}

impl Default for Sx126xFskConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 434.0,
            bit_rate_kbps: 4.8,
            frequency_deviation_khz: 5.0,
            rx_bandwidth_khz: 156.2,
            output_power_dbm: 10,
            preamble_length: 16,
            sync_word: vec![0x2D, 0x01],
            tcxo_voltage: 1.6,
            use_regulator_ldo: false,
            current_limit_ma: 60.0,
            dio2_rf_switch: false,
            packet_length: PacketLengthMode::Variable { max: 0xFF },
            crc: true,
            shaping: DataShaping::Gaussian0_5,
            encoding: Encoding::Whitening,
            node_address: None,
            broadcast_address: None,
        }
    }
}

/// Chip family and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chip", rename_all = "lowercase")]
pub enum ChipConfig {
    Rf69(Rf69Config),
    Sx127x(Sx127xConfig),
    #[serde(rename = "sx127x_fsk")]
    Sx127xFsk(Sx127xFskConfig),
    Sx126x(Sx126xConfig),
    #[serde(rename = "sx126x_fsk")]
    Sx126xFsk(Sx126xFskConfig),
}

impl Default for ChipConfig {
    fn default() -> Self {
        ChipConfig::Sx127x(Sx127xConfig::default())
    }
}

/// Complete radio description: device handle plus chip parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub module: ModuleConfig,
    pub chip: ChipConfig,
}

impl RadioConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RadioError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

//! RF69 register map and field values.
//!
//! Field values are given already shifted into position so they can be passed
//! straight to `Module::set_register_field`.

// =============================================================================
// Register addresses
// =============================================================================

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_DATA_MODUL: u8 = 0x02;
pub const REG_BITRATE_MSB: u8 = 0x03;
pub const REG_BITRATE_LSB: u8 = 0x04;
pub const REG_FDEV_MSB: u8 = 0x05;
pub const REG_FDEV_LSB: u8 = 0x06;
pub const REG_FRF_MSB: u8 = 0x07;
pub const REG_FRF_MID: u8 = 0x08;
pub const REG_FRF_LSB: u8 = 0x09;
pub const REG_VERSION: u8 = 0x10;
pub const REG_PA_LEVEL: u8 = 0x11;
pub const REG_OCP: u8 = 0x13;
pub const REG_RX_BW: u8 = 0x19;
pub const REG_AFC_BW: u8 = 0x1A;
pub const REG_RSSI_CONFIG: u8 = 0x23;
pub const REG_RSSI_VALUE: u8 = 0x24;
pub const REG_DIO_MAPPING_1: u8 = 0x25;
pub const REG_DIO_MAPPING_2: u8 = 0x26;
pub const REG_IRQ_FLAGS_1: u8 = 0x27;
pub const REG_IRQ_FLAGS_2: u8 = 0x28;
pub const REG_RSSI_THRESH: u8 = 0x29;
pub const REG_RX_TIMEOUT_1: u8 = 0x2A;
pub const REG_RX_TIMEOUT_2: u8 = 0x2B;
pub const REG_PREAMBLE_MSB: u8 = 0x2C;
pub const REG_PREAMBLE_LSB: u8 = 0x2D;
pub const REG_SYNC_CONFIG: u8 = 0x2E;
pub const REG_SYNC_VALUE_1: u8 = 0x2F;
pub const REG_PACKET_CONFIG_1: u8 = 0x37;
pub const REG_PAYLOAD_LENGTH: u8 = 0x38;
pub const REG_NODE_ADRS: u8 = 0x39;
pub const REG_BROADCAST_ADRS: u8 = 0x3A;
pub const REG_FIFO_THRESH: u8 = 0x3C;
pub const REG_PACKET_CONFIG_2: u8 = 0x3D;
pub const REG_AES_KEY_1: u8 = 0x3E;
pub const REG_TEMP_1: u8 = 0x4E;
pub const REG_TEMP_2: u8 = 0x4F;
pub const REG_TEST_PA1: u8 = 0x5A;
pub const REG_TEST_PA2: u8 = 0x5C;
pub const REG_TEST_DAGC: u8 = 0x6F;

// =============================================================================
// Field values
// =============================================================================

/// Value of `REG_VERSION` on every RF69/SX1231H part
pub const CHIP_VERSION: u8 = 0x24;

// OP_MODE
pub const SEQUENCER_ON: u8 = 0b0000_0000;
pub const LISTEN_OFF: u8 = 0b0000_0000;
pub const MODE_SLEEP: u8 = 0b0000_0000;
pub const MODE_STANDBY: u8 = 0b0000_0100;
pub const MODE_FS: u8 = 0b0000_1000;
pub const MODE_TX: u8 = 0b0000_1100;
pub const MODE_RX: u8 = 0b0001_0000;

// DATA_MODUL
pub const DATA_MODE_PACKET: u8 = 0b0000_0000;
pub const DATA_MODE_CONTINUOUS_SYNC: u8 = 0b0100_0000;
pub const MODULATION_FSK: u8 = 0b0000_0000;
pub const MODULATION_OOK: u8 = 0b0000_1000;
pub const SHAPING_NONE: u8 = 0b0000_0000;
pub const SHAPING_BT_1_0: u8 = 0b0000_0001;
pub const SHAPING_BT_0_5: u8 = 0b0000_0010;
pub const SHAPING_BT_0_3: u8 = 0b0000_0011;

// PA_LEVEL
pub const PA0_ON: u8 = 0b1000_0000;
pub const PA1_ON: u8 = 0b0100_0000;
pub const PA1_PA2_ON: u8 = 0b0110_0000;

// OCP
pub const OCP_ON: u8 = 0b0001_0000;
pub const OCP_OFF: u8 = 0b0000_0000;
pub const OCP_TRIM_95_MA: u8 = 0b0000_1010;
pub const OCP_TRIM_MAX: u8 = 0b0000_1111;

// TEST_PA1/TEST_PA2
pub const TEST_PA1_NORMAL: u8 = 0x55;
pub const TEST_PA1_BOOST: u8 = 0x5D;
pub const TEST_PA2_NORMAL: u8 = 0x70;
pub const TEST_PA2_BOOST: u8 = 0x7C;

// RX_BW
pub const RX_BW_DCC_FREQ: u8 = 0b0100_0000;

// RSSI_CONFIG
pub const RSSI_START: u8 = 0b0000_0001;
pub const RSSI_DONE: u8 = 0b0000_0010;

// DIO_MAPPING_1
pub const DIO0_PACKET_SENT: u8 = 0b0000_0000;
pub const DIO0_PAYLOAD_READY: u8 = 0b0100_0000;
pub const DIO1_TIMEOUT: u8 = 0b0011_0000;
pub const DIO1_CONT_DCLK: u8 = 0b0000_0000;
pub const DIO2_CONT_DATA: u8 = 0b0000_0000;

// DIO_MAPPING_2
pub const CLK_OUT_OFF: u8 = 0b0000_0111;

// IRQ_FLAGS_1
pub const IRQ_MODE_READY: u8 = 0b1000_0000;
pub const IRQ_TIMEOUT: u8 = 0b0000_0100;

// IRQ_FLAGS_2
pub const IRQ_FIFO_OVERRUN: u8 = 0b0001_0000;
pub const IRQ_PACKET_SENT: u8 = 0b0000_1000;
pub const IRQ_PAYLOAD_READY: u8 = 0b0000_0100;
pub const IRQ_CRC_OK: u8 = 0b0000_0010;

// RSSI_THRESH
pub const RSSI_THRESHOLD_DEFAULT: u8 = 0xE4;

// RX_TIMEOUT
pub const RX_TIMEOUT_OFF: u8 = 0x00;
pub const RX_TIMEOUT_MAX: u8 = 0xFF;

// SYNC_CONFIG
pub const SYNC_ON: u8 = 0b1000_0000;

// PACKET_CONFIG_1
pub const PACKET_FORMAT_FIXED: u8 = 0b0000_0000;
pub const PACKET_FORMAT_VARIABLE: u8 = 0b1000_0000;
pub const DC_FREE_NONE: u8 = 0b0000_0000;
pub const DC_FREE_MANCHESTER: u8 = 0b0010_0000;
pub const DC_FREE_WHITENING: u8 = 0b0100_0000;
pub const CRC_ON: u8 = 0b0001_0000;
pub const CRC_OFF: u8 = 0b0000_0000;
pub const CRC_AUTOCLEAR_OFF: u8 = 0b0000_1000;
pub const ADDRESS_FILTERING_OFF: u8 = 0b0000_0000;
pub const ADDRESS_FILTERING_NODE: u8 = 0b0000_0010;
pub const ADDRESS_FILTERING_NODE_BROADCAST: u8 = 0b0000_0100;

// FIFO_THRESH
pub const TX_START_FIFO_NOT_EMPTY: u8 = 0b1000_0000;
pub const FIFO_THRESHOLD: u8 = 0b0000_1111;

// PACKET_CONFIG_2
pub const AUTO_RX_RESTART_ON: u8 = 0b0000_0010;
pub const AES_ON: u8 = 0b0000_0001;
pub const AES_OFF: u8 = 0b0000_0000;

// TEMP_1
pub const TEMP_MEAS_START: u8 = 0b0000_1000;
pub const TEMP_MEAS_RUNNING: u8 = 0b0000_0100;

// TEST_DAGC
pub const CONTINUOUS_DAGC_LOW_BETA_OFF: u8 = 0x30;

// =============================================================================
// Chip constants
// =============================================================================

/// Crystal oscillator frequency, MHz
pub const CRYSTAL_FREQ_MHZ: f32 = 32.0;

/// Synthesizer resolution, 2^19
pub const DIV_EXPONENT: u32 = 19;

/// FIFO capacity; also the longest packet the driver accepts
pub const FIFO_SIZE: usize = 64;

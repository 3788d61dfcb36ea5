//! SX127x register map.
//!
//! The LoRa and FSK/OOK pages share addresses 0x0D to 0x3F; the FSK page constants
//! follow the LoRa ones. Values are pre-shifted into their `[msb:lsb]` position.

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_FRF_MSB: u8 = 0x06;
pub const REG_PA_CONFIG: u8 = 0x09;
pub const REG_OCP: u8 = 0x0B;
pub const REG_LNA: u8 = 0x0C;
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const REG_IRQ_FLAGS: u8 = 0x12;
pub const REG_RX_NB_BYTES: u8 = 0x13;
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub const REG_RSSI_VALUE: u8 = 0x1B;
pub const REG_HOP_CHANNEL: u8 = 0x1C;
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub const REG_SYMB_TIMEOUT_LSB: u8 = 0x1F;
pub const REG_PREAMBLE_MSB: u8 = 0x20;
pub const REG_PREAMBLE_LSB: u8 = 0x21;
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub const REG_MAX_PAYLOAD_LENGTH: u8 = 0x23;
pub const REG_HOP_PERIOD: u8 = 0x24;
pub const REG_MODEM_CONFIG_3: u8 = 0x26;
pub const REG_RSSI_WIDEBAND: u8 = 0x2C;
pub const REG_DETECT_OPTIMIZE: u8 = 0x31;
pub const REG_DETECTION_THRESHOLD: u8 = 0x37;
pub const REG_SYNC_WORD: u8 = 0x39;
pub const REG_DIO_MAPPING_1: u8 = 0x40;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PA_DAC: u8 = 0x4D;

// FSK/OOK page
pub const REG_BITRATE_MSB: u8 = 0x02;
pub const REG_BITRATE_LSB: u8 = 0x03;
pub const REG_FDEV_MSB: u8 = 0x04;
pub const REG_FDEV_LSB: u8 = 0x05;
pub const REG_PA_RAMP: u8 = 0x0A;
pub const REG_RX_CONFIG: u8 = 0x0D;
pub const REG_RSSI_CONFIG: u8 = 0x0E;
pub const REG_RSSI_THRESH: u8 = 0x10;
pub const REG_RSSI_VALUE_FSK: u8 = 0x11;
pub const REG_RX_BW: u8 = 0x12;
pub const REG_AFC_BW: u8 = 0x13;
pub const REG_OOK_PEAK: u8 = 0x14;
pub const REG_PREAMBLE_DETECT: u8 = 0x1F;
pub const REG_RX_TIMEOUT_1: u8 = 0x20;
pub const REG_RX_TIMEOUT_2: u8 = 0x21;
pub const REG_RX_TIMEOUT_3: u8 = 0x22;
pub const REG_PREAMBLE_MSB_FSK: u8 = 0x25;
pub const REG_PREAMBLE_LSB_FSK: u8 = 0x26;
pub const REG_SYNC_CONFIG: u8 = 0x27;
pub const REG_SYNC_VALUE_1: u8 = 0x28;
pub const REG_PACKET_CONFIG_1: u8 = 0x30;
pub const REG_PACKET_CONFIG_2: u8 = 0x31;
pub const REG_PAYLOAD_LENGTH_FSK: u8 = 0x32;
pub const REG_NODE_ADRS: u8 = 0x33;
pub const REG_BROADCAST_ADRS: u8 = 0x34;
pub const REG_FIFO_THRESH: u8 = 0x35;
pub const REG_IRQ_FLAGS_1: u8 = 0x3E;
pub const REG_IRQ_FLAGS_2: u8 = 0x3F;

pub const CHIP_VERSION: u8 = 0x12;

// OP_MODE
pub const LORA: u8 = 0b1000_0000;
pub const FSK_OOK: u8 = 0b0000_0000;
pub const MODULATION_FSK: u8 = 0b0000_0000;
pub const MODULATION_OOK: u8 = 0b0010_0000;
pub const MODE_SLEEP: u8 = 0b0000_0000;
pub const MODE_STANDBY: u8 = 0b0000_0001;
pub const MODE_FSTX: u8 = 0b0000_0010;
pub const MODE_TX: u8 = 0b0000_0011;
pub const MODE_RXCONTINUOUS: u8 = 0b0000_0101;
pub const MODE_RXSINGLE: u8 = 0b0000_0110;
pub const MODE_CAD: u8 = 0b0000_0111;
pub const MODE_FSK_RX: u8 = 0b0000_0101;

// PA_CONFIG
pub const PA_SELECT_RFO: u8 = 0b0000_0000;
pub const PA_SELECT_BOOST: u8 = 0b1000_0000;
pub const MAX_POWER: u8 = 0b0111_0000;
pub const LOW_POWER: u8 = 0b0010_0000;
pub const OUTPUT_POWER_MAX: u8 = 0b0000_1111;

// PA_DAC
pub const PA_BOOST_OFF: u8 = 0b0000_0100;
pub const PA_BOOST_ON: u8 = 0b0000_0111;

// OCP
pub const OCP_OFF: u8 = 0b0000_0000;
pub const OCP_ON: u8 = 0b0010_0000;

// LNA
pub const LNA_BOOST_HF_ON: u8 = 0b0000_0011;

// MODEM_CONFIG_1
pub const HEADER_EXPLICIT: u8 = 0b0000_0000;
pub const HEADER_IMPLICIT: u8 = 0b0000_0001;

// MODEM_CONFIG_2
pub const TX_MODE_SINGLE: u8 = 0b0000_0000;
pub const RX_CRC_ON: u8 = 0b0000_0100;
pub const RX_CRC_OFF: u8 = 0b0000_0000;

// MODEM_CONFIG_3
pub const LOW_DATA_RATE_OPT_ON: u8 = 0b0000_1000;
pub const LOW_DATA_RATE_OPT_OFF: u8 = 0b0000_0000;
pub const AGC_AUTO_ON: u8 = 0b0000_0100;
pub const AGC_AUTO_OFF: u8 = 0b0000_0000;

// HOP_CHANNEL
pub const CRC_ON_PAYLOAD: u8 = 0b0100_0000;

// DETECT_OPTIMIZE / DETECTION_THRESHOLD
pub const DETECT_OPTIMIZE_SF_6: u8 = 0b0000_0101;
pub const DETECT_OPTIMIZE_SF_7_12: u8 = 0b0000_0011;
pub const DETECTION_THRESHOLD_SF_6: u8 = 0b0000_1100;
pub const DETECTION_THRESHOLD_SF_7_12: u8 = 0b0000_1010;

pub const HOP_PERIOD_OFF: u8 = 0x00;

// DIO_MAPPING_1
pub const DIO0_RX_DONE: u8 = 0b0000_0000;
pub const DIO0_TX_DONE: u8 = 0b0100_0000;
pub const DIO0_CAD_DONE: u8 = 0b1000_0000;
pub const DIO1_RX_TIMEOUT: u8 = 0b0000_0000;
pub const DIO1_CAD_DETECTED: u8 = 0b0010_0000;

// IRQ_FLAGS
pub const IRQ_RX_TIMEOUT: u8 = 0b1000_0000;
pub const IRQ_RX_DONE: u8 = 0b0100_0000;
pub const IRQ_PAYLOAD_CRC_ERROR: u8 = 0b0010_0000;
pub const IRQ_TX_DONE: u8 = 0b0000_1000;
pub const IRQ_CAD_DONE: u8 = 0b0000_0100;
pub const IRQ_CAD_DETECTED: u8 = 0b0000_0001;

// PA_RAMP (FSK shaping, OOK filtering)
pub const SHAPING_NONE: u8 = 0b0000_0000;
pub const SHAPING_BT_1_0: u8 = 0b0010_0000;
pub const SHAPING_BT_0_5: u8 = 0b0100_0000;
pub const SHAPING_BT_0_3: u8 = 0b0110_0000;

// RX_CONFIG
pub const AFC_AUTO_ON: u8 = 0b0001_0000;
pub const AFC_AUTO_OFF: u8 = 0b0000_0000;
pub const RX_AGC_AUTO_ON: u8 = 0b0000_1000;
pub const RX_AGC_AUTO_OFF: u8 = 0b0000_0000;
pub const RX_TRIGGER_RSSI_INTERRUPT: u8 = 0b0000_0001;

// RSSI_CONFIG / RSSI_THRESH
pub const RSSI_SMOOTHING_SAMPLES_8: u8 = 0b0000_0010;
pub const RSSI_THRESHOLD: u8 = 0xFF;

// OOK_PEAK
pub const OOK_BIT_SYNC_ON: u8 = 0b0010_0000;
pub const OOK_BIT_SYNC_OFF: u8 = 0b0000_0000;

// PREAMBLE_DETECT
pub const PREAMBLE_DETECTOR_ON: u8 = 0b1000_0000;
pub const PREAMBLE_DETECTOR_2_BYTE: u8 = 0b0010_0000;
pub const PREAMBLE_DETECTOR_TOL: u8 = 0b0000_1010;

pub const RX_TIMEOUT_OFF: u8 = 0x00;

// SYNC_CONFIG
pub const PREAMBLE_POLARITY_55: u8 = 0b0010_0000;
pub const SYNC_ON: u8 = 0b0001_0000;

// PACKET_CONFIG_1
pub const PACKET_FIXED: u8 = 0b0000_0000;
pub const PACKET_VARIABLE: u8 = 0b1000_0000;
pub const DC_FREE_NONE: u8 = 0b0000_0000;
pub const DC_FREE_MANCHESTER: u8 = 0b0010_0000;
pub const DC_FREE_WHITENING: u8 = 0b0100_0000;
pub const CRC_ON: u8 = 0b0001_0000;
pub const CRC_OFF: u8 = 0b0000_0000;
pub const ADDRESS_FILTERING_OFF: u8 = 0b0000_0000;
pub const ADDRESS_FILTERING_NODE: u8 = 0b0000_0010;
pub const ADDRESS_FILTERING_NODE_BROADCAST: u8 = 0b0000_0100;

// PACKET_CONFIG_2
pub const DATA_MODE_PACKET: u8 = 0b0100_0000;
pub const DATA_MODE_CONTINUOUS: u8 = 0b0000_0000;

// FIFO_THRESH
pub const TX_START_FIFO_NOT_EMPTY: u8 = 0b1000_0000;
pub const FIFO_THRESHOLD: u8 = 0x0F;

// DIO_MAPPING_1 in FSK packet and continuous mode
pub const DIO0_PACKET_SENT: u8 = 0b0000_0000;
pub const DIO0_PAYLOAD_READY: u8 = 0b0000_0000;
pub const DIO1_CONT_DCLK: u8 = 0b0000_0000;
pub const DIO2_CONT_DATA: u8 = 0b0000_0000;

// IRQ_FLAGS_2
pub const IRQ_FIFO_OVERRUN: u8 = 0b0001_0000;
pub const IRQ_PACKET_SENT: u8 = 0b0000_1000;
pub const IRQ_PAYLOAD_READY: u8 = 0b0000_0100;
pub const IRQ_CRC_OK: u8 = 0b0000_0010;

/// Symbol timeout loaded by `receive`, symbols
pub const RX_TIMEOUT_SYMBOLS: u8 = 100;

pub const CRYSTAL_FREQ_MHZ: f32 = 32.0;
pub const DIV_EXPONENT: u32 = 19;
pub const FIFO_SIZE: usize = 255;
pub const FIFO_SIZE_FSK: usize = 64;

//! # Parameterized CRC Engine
//!
//! Stateless checksum computation for any CRC of width 8, 16, 24 or 32 bits described
//! by the five-tuple (width, polynomial, init, final XOR, reflect-in/reflect-out).
//!
//! The buffer is processed in `width/8`-byte windows. Each window is assembled
//! MSB-first (after optional per-byte reflection), XORed into the register and shifted
//! through the polynomial one bit at a time. A trailing partial window is aligned to
//! the top of the register and shifted only for the bytes it contains, so results equal
//! the byte-wise definition for every input length.
//!
//! ```rust
//! use radiophy_rs::crc::CrcParams;
//!
//! assert_eq!(CrcParams::CCITT_FALSE.checksum(b"123456789"), 0x29B1);
//! assert_eq!(CrcParams::GENIBUS.checksum(b"123456789"), 0xD64E);
//!
//! let custom = CrcParams::new(16, 0x8005, 0x0000, 0x0000, true, true).unwrap();
//! assert_eq!(custom.checksum(b"123456789"), 0xBB3D);
//! ```

use crate::error::{RadioError, Result};
use crate::util::bitrev::{reflect, rev8};

/// Complete description of a CRC algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrcParams {
    width: u8,
    poly: u32,
    init: u32,
    final_xor: u32,
    ref_in: bool,
    ref_out: bool,
}

impl CrcParams {
    /// CRC-16/CCITT-FALSE (IBM-3740): poly 0x1021, init 0xFFFF, no reflection
    pub const CCITT_FALSE: CrcParams = CrcParams::preset(16, 0x1021, 0xFFFF, 0x0000, false, false);
    /// CRC-16/GENIBUS: CCITT-FALSE with final XOR 0xFFFF
    pub const GENIBUS: CrcParams = CrcParams::preset(16, 0x1021, 0xFFFF, 0xFFFF, false, false);
    /// CRC-16/KERMIT
    pub const KERMIT: CrcParams = CrcParams::preset(16, 0x1021, 0x0000, 0x0000, true, true);
    /// CRC-16/X-25
    pub const X25: CrcParams = CrcParams::preset(16, 0x1021, 0xFFFF, 0xFFFF, true, true);
    /// CRC-16/ARC
    pub const ARC: CrcParams = CrcParams::preset(16, 0x8005, 0x0000, 0x0000, true, true);
    /// CRC-8/SMBUS
    pub const CRC8: CrcParams = CrcParams::preset(8, 0x07, 0x00, 0x00, false, false);
    /// CRC-24/OPENPGP
    pub const CRC24_OPENPGP: CrcParams =
        CrcParams::preset(24, 0x86_4CFB, 0xB7_04CE, 0x00_0000, false, false);
    /// CRC-32/ISO-HDLC
    pub const CRC32: CrcParams =
        CrcParams::preset(32, 0x04C1_1DB7, 0xFFFF_FFFF, 0xFFFF_FFFF, true, true);
    /// CRC-32/MPEG-2
    pub const CRC32_MPEG2: CrcParams =
        CrcParams::preset(32, 0x04C1_1DB7, 0xFFFF_FFFF, 0x0000_0000, false, false);

    const fn preset(width: u8, poly: u32, init: u32, final_xor: u32, ref_in: bool, ref_out: bool) -> Self {
        Self {
            width,
            poly,
            init,
            final_xor,
            ref_in,
            ref_out,
        }
    }

    /// Validated constructor. `width` must be 8, 16, 24 or 32 and the other values
    /// must fit in `width` bits.
    pub fn new(
        width: u8,
        poly: u32,
        init: u32,
        final_xor: u32,
        ref_in: bool,
        ref_out: bool,
    ) -> Result<Self> {
        if !matches!(width, 8 | 16 | 24 | 32) {
            return Err(RadioError::InvalidCrcParams(format!(
                "width {} is not a multiple of 8 in 8..=32",
                width
            )));
        }
        let params = Self::preset(width, poly, init, final_xor, ref_in, ref_out);
        let mask = params.mask();
        for (name, value) in [("poly", poly), ("init", init), ("final_xor", final_xor)] {
            if value & !mask != 0 {
                return Err(RadioError::InvalidCrcParams(format!(
                    "{} 0x{:X} wider than {} bits",
                    name, value, width
                )));
            }
        }
        Ok(params)
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn poly(&self) -> u32 {
        self.poly
    }

    pub fn init(&self) -> u32 {
        self.init
    }

    pub fn final_xor(&self) -> u32 {
        self.final_xor
    }

    pub fn ref_in(&self) -> bool {
        self.ref_in
    }

    pub fn ref_out(&self) -> bool {
        self.ref_out
    }

    /// Checksum size on the wire
    pub fn byte_len(&self) -> usize {
        usize::from(self.width / 8)
    }

    /// All-ones value of `width` bits
    pub fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Compute the checksum of `data`.
    pub fn checksum(&self, data: &[u8]) -> u32 {
        let width = u32::from(self.width);
        let mask = u64::from(self.mask());
        let top = 1u64 << (width - 1);
        let poly = u64::from(self.poly) & mask;
        let mut crc = u64::from(self.init) & mask;

        for window in data.chunks(self.byte_len()) {
            let mut bits = 0u64;
            for (j, &byte) in window.iter().enumerate() {
                let byte = if self.ref_in { rev8(byte) } else { byte };
                bits |= u64::from(byte) << (width - 8 - 8 * j as u32);
            }
            crc ^= bits;
            for _ in 0..8 * window.len() {
                crc = if crc & top != 0 {
                    ((crc << 1) ^ poly) & mask
                } else {
                    (crc << 1) & mask
                };
            }
        }

        crc ^= u64::from(self.final_xor) & mask;
        let mut out = crc as u32;
        if self.ref_out {
            out = reflect(out, self.width);
        }
        out & self.mask()
    }

    /// Register value before any input, for use with [`CrcParams::update`]
    pub fn start(&self) -> u32 {
        self.init & self.mask()
    }

    /// Feed one byte into a running register started with [`CrcParams::start`].
    pub fn update(&self, crc: u32, byte: u8) -> u32 {
        let width = u32::from(self.width);
        let mask = u64::from(self.mask());
        let top = 1u64 << (width - 1);
        let byte = if self.ref_in { rev8(byte) } else { byte };
        let mut crc = (u64::from(crc) ^ (u64::from(byte) << (width - 8))) & mask;
        for _ in 0..8 {
            crc = if crc & top != 0 {
                ((crc << 1) ^ u64::from(self.poly)) & mask
            } else {
                (crc << 1) & mask
            };
        }
        crc as u32
    }

    /// Apply final XOR and output reflection to a running register.
    pub fn finish(&self, crc: u32) -> u32 {
        let mut out = (crc ^ self.final_xor) & self.mask();
        if self.ref_out {
            out = reflect(out, self.width);
        }
        out
    }

    /// Checksum serialized big-endian in `width/8` bytes
    pub fn checksum_bytes(&self, data: &[u8]) -> ([u8; 4], usize) {
        let crc = self.checksum(data).to_be_bytes();
        let len = self.byte_len();
        let mut out = [0u8; 4];
        out[..len].copy_from_slice(&crc[4 - len..]);
        (out, len)
    }

    /// Verify `data` against a big-endian checksum trailer
    pub fn verify(&self, data: &[u8], trailer: &[u8]) -> bool {
        let (expected, len) = self.checksum_bytes(data);
        trailer.len() == len && trailer == &expected[..len]
    }
}

impl Default for CrcParams {
    fn default() -> Self {
        Self::CCITT_FALSE
    }
}

//! Cross-checks of the CRC engine against the `crc` crate and published check values.
//!
//! The engine applies the final XOR before output reflection. For reflected outputs the
//! reference algorithm is therefore given a reflected XOR constant, which makes the two
//! definitions produce identical checksums.

use crc::{Algorithm, Crc};
use proptest::prelude::*;
use radiophy_rs::crc::CrcParams;
use radiophy_rs::util::bitrev::reflect;
use radiophy_rs::RadioError;

const CHECK: &[u8] = b"123456789";

fn reference(params: &CrcParams) -> Crc<u32> {
    let xorout = if params.ref_out() {
        reflect(params.final_xor(), params.width())
    } else {
        params.final_xor()
    };
    let algorithm: &'static Algorithm<u32> = Box::leak(Box::new(Algorithm {
        width: params.width(),
        poly: params.poly(),
        init: params.init(),
        refin: params.ref_in(),
        refout: params.ref_out(),
        xorout,
        check: 0,
        residue: 0,
    }));
    Crc::<u32>::new(algorithm)
}

fn arb_params() -> impl Strategy<Value = CrcParams> {
    (
        prop::sample::select(vec![8u8, 16, 24, 32]),
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(width, poly, init, xorout, ref_in, ref_out)| {
            let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
            // odd polynomials only, as in every catalogued CRC
            CrcParams::new(width, (poly & mask) | 1, init & mask, xorout & mask, ref_in, ref_out)
                .unwrap()
        })
}

/// Test the "123456789" check values of the named presets
#[test]
fn test_check_vectors() {
    let cases = [
        (CrcParams::CCITT_FALSE, 0x29B1),
        (CrcParams::GENIBUS, 0xD64E),
        (CrcParams::KERMIT, 0x2189),
        (CrcParams::X25, 0x906E),
        (CrcParams::ARC, 0xBB3D),
        (CrcParams::CRC8, 0xF4),
        (CrcParams::CRC24_OPENPGP, 0x21_CF02),
        (CrcParams::CRC32, 0xCBF4_3926),
        (CrcParams::CRC32_MPEG2, 0x0376_E6E7),
    ];
    for (params, expected) in cases {
        assert_eq!(params.checksum(CHECK), expected, "{:?}", params);
    }
}

/// Test the presets against the catalogue algorithms of the `crc` crate
#[test]
fn test_presets_match_catalogue() {
    let data = b"The quick brown fox jumps over the lazy dog";
    assert_eq!(
        CrcParams::CCITT_FALSE.checksum(data),
        u32::from(Crc::<u16>::new(&crc::CRC_16_IBM_3740).checksum(data))
    );
    assert_eq!(
        CrcParams::GENIBUS.checksum(data),
        u32::from(Crc::<u16>::new(&crc::CRC_16_GENIBUS).checksum(data))
    );
    assert_eq!(
        CrcParams::KERMIT.checksum(data),
        u32::from(Crc::<u16>::new(&crc::CRC_16_KERMIT).checksum(data))
    );
    assert_eq!(
        CrcParams::X25.checksum(data),
        u32::from(Crc::<u16>::new(&crc::CRC_16_IBM_SDLC).checksum(data))
    );
    assert_eq!(
        CrcParams::CRC8.checksum(data),
        u32::from(Crc::<u8>::new(&crc::CRC_8_SMBUS).checksum(data))
    );
    assert_eq!(
        CrcParams::CRC24_OPENPGP.checksum(data),
        Crc::<u32>::new(&crc::CRC_24_OPENPGP).checksum(data)
    );
    assert_eq!(
        CrcParams::CRC32.checksum(data),
        Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(data)
    );
}

/// Test that an asymmetric final XOR is applied before output reflection
#[test]
fn test_final_xor_precedes_reflection() {
    let params = CrcParams::new(16, 0x1021, 0xFFFF, 0x00FF, true, true).unwrap();
    let plain = CrcParams::new(16, 0x1021, 0xFFFF, 0x0000, true, true).unwrap();
    assert_eq!(
        params.checksum(CHECK),
        plain.checksum(CHECK) ^ reflect(0x00FF, 16)
    );
}

/// Test that parameters wider than the CRC are refused
#[test]
fn test_invalid_parameters() {
    for (width, poly, init, xorout) in [
        (0u8, 0x07u32, 0u32, 0u32),
        (12, 0x80F, 0, 0),
        (40, 0x07, 0, 0),
        (8, 0x107, 0, 0),
        (16, 0x1021, 0, 0x1_FFFF),
    ] {
        assert!(matches!(
            CrcParams::new(width, poly, init, xorout, false, false),
            Err(RadioError::InvalidCrcParams(_))
        ));
    }
}

proptest! {
    /// Any valid definition agrees with the reference implementation on any input
    #[test]
    fn prop_matches_reference(params in arb_params(), data in prop::collection::vec(any::<u8>(), 0..300)) {
        let reference = reference(&params);
        prop_assert_eq!(params.checksum(&data), reference.checksum(&data));
    }

    /// The streaming interface gives the windowed result
    #[test]
    fn prop_streaming_matches_windowed(params in arb_params(), data in prop::collection::vec(any::<u8>(), 0..64)) {
        let running = data.iter().fold(params.start(), |crc, &b| params.update(crc, b));
        prop_assert_eq!(params.finish(running), params.checksum(&data));
    }

    /// A packet followed by its own trailer verifies; any single bit flip does not
    #[test]
    fn prop_verify_detects_bit_flips(data in prop::collection::vec(any::<u8>(), 1..64), bit in 0usize..512) {
        let params = CrcParams::CCITT_FALSE;
        let (trailer, len) = params.checksum_bytes(&data);
        prop_assert!(params.verify(&data, &trailer[..len]));

        let mut damaged = data.clone();
        let bit = bit % (8 * damaged.len());
        damaged[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(!params.verify(&damaged, &trailer[..len]));
    }
}

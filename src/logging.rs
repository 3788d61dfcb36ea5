use log::{log_enabled, trace, Level};

use crate::util::hex::format_hex_compact;

/// Initializes the logger with the `env_logger` crate (`RUST_LOG` controls filtering).
pub fn init_logger() {
    env_logger::init();
}

/// Initializes a test-friendly logger; safe to call from every test.
pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Traces one SPI frame as `prefix: mosi -> miso`.
///
/// Formatting is skipped entirely unless trace logging is enabled for this module.
pub fn log_spi_frame(prefix: &str, mosi: &[u8], miso: &[u8]) {
    if log_enabled!(Level::Trace) {
        trace!(
            "{}: {} -> {}",
            prefix,
            format_hex_compact(mosi),
            format_hex_compact(miso)
        );
    }
}

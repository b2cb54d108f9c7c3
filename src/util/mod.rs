//! Shared helpers: hex encoding and rate-limited logging.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex, hex_prefix, hex_to_bytes};
pub use logging::LogThrottle;

//! # Hex Encoding Utilities
//!
//! Thin wrappers around the `hex` crate used for diagnostics payloads and
//! test frame construction. Diagnostics always use lowercase hex.

use thiserror::Error;

/// Errors that can occur during hex decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to a lowercase hex string.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode at most `max_bytes` leading bytes as lowercase hex.
///
/// Used for bounded raw-byte capture in per-packet diagnostics; `0` means no
/// limit.
pub fn hex_prefix(data: &[u8], max_bytes: usize) -> String {
    let n = if max_bytes == 0 {
        data.len()
    } else {
        data.len().min(max_bytes)
    };
    hex::encode(&data[..n])
}

/// Decode a hex string, ignoring whitespace.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }
    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Test-data helper; panics on invalid hex.
pub fn hex_to_bytes(hex_str: &str) -> Vec<u8> {
    decode_hex(hex_str).expect("Invalid hex in test data")
}

//! Base64URL decoding per RFC 4648
//!
//! This module provides a thin wrapper around the `base64` crate with
//! size limit validation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Check that every character belongs to the unpadded Base64URL alphabet
pub(crate) fn is_base64url(input: &str) -> bool {
    input
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Decode Base64URL string to bytes with maximum size limit
pub(crate) fn decode_bytes(input: &str, max_size: usize) -> Result<Vec<u8>, String> {
    let result = URL_SAFE_NO_PAD
        .decode(input)
        .map_err(|e| format!("Base64URL decode failed: {e}"))?;

    if result.len() > max_size {
        return Err(format!(
            "Decoded size exceeds limit: {} bytes (max: {max_size})",
            result.len()
        ));
    }

    Ok(result)
}

/// Decode Base64URL string to UTF-8 string with size limit
pub(crate) fn decode_string(input: &str, max_size: usize) -> Result<String, String> {
    decode_bytes(input, max_size)
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| format!("Invalid UTF-8: {e}")))
}

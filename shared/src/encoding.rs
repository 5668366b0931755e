//! Hexadecimal text codec for group elements
//!
//! Public values and shared secrets travel as lowercase hex with no `0x`
//! prefix, no sign and no separators. Decoding also accepts uppercase digits.

use crate::error::{KeyAgreementError, Result};
use num_bigint::BigUint;

/// Encode an integer as lowercase hex. Zero encodes as `"0"`.
pub fn encode_hex(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// Decode a bare hex string into an unsigned integer.
///
/// `BigUint::parse_bytes` alone tolerates `+` and `_`, so digits are checked first.
pub fn decode_hex(text: &str) -> Result<BigUint> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeyAgreementError::InvalidHex(text.to_string()));
    }
    BigUint::parse_bytes(text.as_bytes(), 16)
        .ok_or_else(|| KeyAgreementError::InvalidHex(text.to_string()))
}

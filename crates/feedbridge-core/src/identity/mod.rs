//! Identifiers and key material
//!
//! - [`Key`]: composite `<sigil><base64>.<algorithm>` identifiers
//! - [`DataKey`]: 32-byte network/HMAC keys in canonical base64
//! - [`Secret`]: keypair record handed to the engine at startup

mod data_key;
mod key;
mod secret;

pub use data_key::{DataKey, DATA_KEY_LEN};
pub use key::{Algorithm, Key, Sigil};
pub use secret::Secret;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

/// Standard alphabet with mandatory padding, tolerant of odd trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

/// Decode base64, skipping any character outside the standard alphabet.
pub(crate) fn decode_base64_lenient(text: &str) -> Option<Vec<u8>> {
    let filtered: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    LENIENT.decode(filtered.as_bytes()).ok()
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

//! 32-byte secrets shared by every peer of a network (network key, HMAC key)

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use super::{decode_base64_lenient, encode_base64};
use crate::error::{BridgeError, BridgeResult};

/// Required decoded length of a data key
pub const DATA_KEY_LEN: usize = 32;

/// A 32-byte key kept alongside its canonical base64 text.
///
/// Equality is by canonical text.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey {
    bytes: [u8; DATA_KEY_LEN],
    text: String,
}

impl DataKey {
    /// Parse base64 text, ignoring characters outside the alphabet.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::InvalidDataKey` unless the text decodes to
    /// exactly 32 bytes.
    pub fn from_base64(text: &str) -> BridgeResult<Self> {
        let decoded = decode_base64_lenient(text)
            .ok_or_else(|| BridgeError::InvalidDataKey("not valid base64".to_string()))?;

        let bytes: [u8; DATA_KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            warn!(len = decoded.len(), "invalid data key length");
            BridgeError::InvalidDataKey(format!(
                "expected {} bytes, got {}",
                DATA_KEY_LEN,
                decoded.len()
            ))
        })?;

        Ok(Self {
            bytes,
            text: encode_base64(&bytes),
        })
    }

    /// Build from raw bytes by encoding and decoding again.
    pub fn from_bytes(bytes: &[u8]) -> BridgeResult<Self> {
        Self::from_base64(&encode_base64(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DATA_KEY_LEN] {
        &self.bytes
    }

    /// Canonical base64 text
    pub fn as_base64(&self) -> &str {
        &self.text
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

impl Serialize for DataKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for DataKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        DataKey::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

//! Keypair record exchanged with the engine
//!
//! The engine produces and consumes this record as JSON:
//!
//! ```text
//! {"curve":"ed25519","id":"@<pub>.ggfeed-v1","private":"<seed+pub>.ed25519","public":"<pub>.ed25519"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Algorithm, Key};
use crate::error::{BridgeError, BridgeResult};

/// A signing keypair and the feed identifier derived from it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub curve: Algorithm,
    /// Canonical feed identifier of this keypair
    pub id: String,
    #[serde(rename = "private")]
    pub private_key: String,
    #[serde(rename = "public")]
    pub public_key: String,
}

impl Secret {
    /// Parse the engine's JSON keypair record.
    pub fn from_json(text: &str) -> BridgeResult<Self> {
        serde_json::from_str(text).map_err(|e| BridgeError::processing("secret decoding failed", e))
    }

    /// Canonical JSON form (forward slashes left unescaped).
    pub fn to_json(&self) -> BridgeResult<String> {
        serde_json::to_string(self).map_err(|e| BridgeError::processing("secret encoding failed", e))
    }

    /// Legacy JSON form with every `/` written as `\/`.
    ///
    /// Both forms decode to the same record; older engine builds were fed
    /// this one.
    pub fn to_json_escaped(&self) -> BridgeResult<String> {
        Ok(self.to_json()?.replace('/', "\\/"))
    }

    /// The feed this keypair publishes as.
    pub fn identity(&self) -> Key {
        Key::new(self.id.clone())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("curve", &self.curve)
            .field("id", &self.id)
            .field("public", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Sigil;

    const SECRET: &str = r#"{"curve":"ed25519","id":"@shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ggfeed-v1","private":"RdUdi8VQFb38R3Tyv9/iWZwRmCy1L1GfbR6JVrTLHkKyHBAZqLT1O/4+NuB17qWaFCFzfg1RG0/aLCcjTGwq1A==.ed25519","public":"shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ed25519"}"#;

    #[test]
    fn test_parse_engine_keypair() {
        let secret = Secret::from_json(SECRET).unwrap();
        assert_eq!(secret.curve, Algorithm::Ed25519);
        assert!(secret.private_key.ends_with(".ed25519"));

        let identity = secret.identity();
        assert!(identity.is_valid());
        assert_eq!(identity.sigil(), Sigil::Feed);
        assert_eq!(identity.algorithm(), Algorithm::GgFeed);
    }

    #[test]
    fn test_canonical_json_round_trips_exactly() {
        let secret = Secret::from_json(SECRET).unwrap();
        assert_eq!(secret.to_json().unwrap(), SECRET);
    }

    #[test]
    fn test_escaped_form_is_equivalent() {
        let secret = Secret::from_json(SECRET).unwrap();
        let escaped = secret.to_json_escaped().unwrap();

        assert!(escaped.contains("\\/"));
        assert!(!escaped.replace("\\/", "").contains('/'));
        assert_eq!(Secret::from_json(&escaped).unwrap(), secret);
    }

    #[test]
    fn test_malformed_json_is_processing_error() {
        let err = Secret::from_json("{\"curve\":").unwrap_err();
        assert!(matches!(err, BridgeError::DuringProcessing { .. }));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let secret = Secret::from_json(SECRET).unwrap();
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("RdUdi8VQ"));
    }
}

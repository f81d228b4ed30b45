//! Composite network identifiers
//!
//! Format: `<sigil><base64-payload>.<algorithm>`
//!
//! ```text
//! @shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ggfeed-v1
//! │└──────────────── payload ─────────────────┘└─ algorithm
//! └ sigil (feed)
//! ```
//!
//! Parsing never fails. A malformed identifier is still a [`Key`]; its
//! derived accessors ([`Key::payload`], [`Key::decoded_bytes`], [`Key::hex`])
//! report the failure instead.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use super::{decode_base64_lenient, encode_base64};

/// Leading character classifying what an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sigil {
    /// `&` - content-addressed blob
    Blob,
    /// `@` - feed (also used for identities)
    Feed,
    /// `%` - message (also used for links)
    Message,
    /// Anything else
    Unsupported,
}

impl Sigil {
    /// Classify an identifier by its first character only.
    pub fn parse(text: &str) -> Self {
        match text.chars().next() {
            Some('&') => Sigil::Blob,
            Some('@') => Sigil::Feed,
            Some('%') => Sigil::Message,
            _ => Sigil::Unsupported,
        }
    }

    /// The sigil character, `None` for `Unsupported`.
    pub fn as_char(&self) -> Option<char> {
        self.prefix().chars().next()
    }

    /// The sigil character, empty for `Unsupported`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Sigil::Blob => "&",
            Sigil::Feed => "@",
            Sigil::Message => "%",
            Sigil::Unsupported => "",
        }
    }
}

/// Trailing suffix indicating how an identifier's payload was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Ed25519,
    /// Gabby Grove feed format
    GgFeed,
    /// Gabby Grove message format
    GgFeedMsg,
    Unsupported,
}

impl Algorithm {
    const KNOWN: [Algorithm; 4] = [
        Algorithm::Sha256,
        Algorithm::Ed25519,
        Algorithm::GgFeed,
        Algorithm::GgFeedMsg,
    ];

    /// Classify an identifier by its trailing `.<algorithm>` suffix.
    pub fn from_suffix(text: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|algo| text.ends_with(algo.suffix()))
            .unwrap_or(Algorithm::Unsupported)
    }

    /// Look up an algorithm by its bare name (`"ggfeed-v1"`).
    pub fn from_name(name: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|algo| algo.name() == name)
            .unwrap_or(Algorithm::Unsupported)
    }

    /// Bare name as used in keypair records.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Ed25519 => "ed25519",
            Algorithm::GgFeed => "ggfeed-v1",
            Algorithm::GgFeedMsg => "ggmsg-v1",
            Algorithm::Unsupported => "unsupported",
        }
    }

    /// Identifier suffix including the separating dot, empty for `Unsupported`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => ".sha256",
            Algorithm::Ed25519 => ".ed25519",
            Algorithm::GgFeed => ".ggfeed-v1",
            Algorithm::GgFeedMsg => ".ggmsg-v1",
            Algorithm::Unsupported => "",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Algorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Algorithm::from_name(&name))
    }
}

/// A composite identifier referencing a feed, message or blob.
///
/// Equality and hashing are by raw text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Wrap raw identifier text. Never fails; see [`Key::is_valid`].
    pub fn new(raw: impl Into<String>) -> Self {
        Key(raw.into())
    }

    /// Render a canonical identifier from its parts.
    pub fn from_parts(sigil: Sigil, payload: &[u8], algorithm: Algorithm) -> Self {
        Key(format!(
            "{}{}{}",
            sigil.prefix(),
            encode_base64(payload),
            algorithm.suffix()
        ))
    }

    /// Get the raw identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn sigil(&self) -> Sigil {
        Sigil::parse(&self.0)
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::from_suffix(&self.0)
    }

    /// The base64 text between the sigil and the algorithm suffix.
    ///
    /// `None` unless the identifier has exactly one `.`, a padded (`=`)
    /// leading component longer than the sigil, and a supported sigil.
    pub fn payload(&self) -> Option<&str> {
        let mut components = self.0.split('.');
        let head = components.next()?;
        components.next()?;
        if components.next().is_some() {
            return None;
        }
        if head.chars().count() <= 1 || !head.ends_with('=') {
            return None;
        }
        if Sigil::parse(head) == Sigil::Unsupported {
            return None;
        }
        // Supported sigils are single-byte ASCII
        Some(&head[1..])
    }

    pub fn is_valid(&self) -> bool {
        self.sigil() != Sigil::Unsupported
            && self.payload().is_some()
            && self.algorithm() != Algorithm::Unsupported
    }

    /// Payload decoded from base64, ignoring characters outside the alphabet.
    pub fn decoded_bytes(&self) -> Option<Vec<u8>> {
        if !self.is_valid() {
            debug!(key = %self.0, "invalid identifier");
            return None;
        }
        decode_base64_lenient(self.payload()?)
    }

    /// Lowercase hex of the decoded payload, empty if the key is invalid.
    pub fn hex(&self) -> String {
        self.decoded_bytes().map(hex::encode).unwrap_or_default()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Key {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Key::new(s))
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::new(raw)
    }
}

impl From<String> for Key {
    fn from(raw: String) -> Self {
        Key(raw)
    }
}

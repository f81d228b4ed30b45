//! Engine status reports

use serde::{Deserialize, Deserializer, Serialize};

use crate::identity::Key;

/// Go marshals empty slices as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Repository counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub messages: u64,
    pub feeds: u64,
    /// Key of the most recently stored message, empty for a fresh repository
    #[serde(rename = "lastHash", default)]
    pub last_hash: Key,
}

/// A live connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    #[serde(rename = "Addr")]
    pub address: String,
    /// When the connection was established, as reported by the engine
    #[serde(rename = "Since")]
    pub since: String,
}

/// A blob the engine is looking for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobWant {
    #[serde(rename = "Ref")]
    pub reference: Key,
    /// Hop distance of the requester, negative when we want it ourselves
    #[serde(rename = "Dist")]
    pub distance: i64,
}

/// Snapshot of the running engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStatus {
    /// Length of the receive log
    #[serde(rename = "Root")]
    pub root: i64,
    #[serde(rename = "Peers", default, deserialize_with = "null_as_empty")]
    pub peers: Vec<PeerStatus>,
    #[serde(rename = "Blobs", default, deserialize_with = "null_as_empty")]
    pub blobs: Vec<BlobWant>,
}

/// Outcome of a repository heal pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealReport {
    /// Feeds that had broken messages removed
    #[serde(rename = "Authors", default, deserialize_with = "null_as_empty")]
    pub authors: Vec<Key>,
    #[serde(rename = "Messages")]
    pub messages: u32,
}

//! Feed list decoding
//!
//! The engine replies with `{"<feed>": <latest sequence>, ...}`. Entries
//! whose value is not an integer are kept out of the mapping but recorded,
//! so callers can see what was dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::identity::Key;

/// A feed-list entry excluded from the mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedFeedEntry {
    pub feed: Key,
    pub reason: String,
}

/// Stored feeds and their current sequence numbers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedList {
    entries: BTreeMap<Key, i64>,
    rejected: Vec<RejectedFeedEntry>,
}

impl FeedList {
    pub fn from_json(text: &str) -> BridgeResult<Self> {
        let raw: Map<String, Value> = serde_json::from_str(text)
            .map_err(|e| BridgeError::processing("feedList json decoding error", e))?;

        let mut list = FeedList::default();
        for (feed, value) in raw {
            // Keys are taken as given; the engine only returns canonical ones
            let feed = Key::new(feed);
            match value.as_i64() {
                Some(sequence) => {
                    list.entries.insert(feed, sequence);
                }
                None => {
                    let reason = format!("sequence is not an integer: {value}");
                    warn!(%feed, %reason, "dropping feed list entry");
                    list.rejected.push(RejectedFeedEntry { feed, reason });
                }
            }
        }
        Ok(list)
    }

    pub fn get(&self, feed: &Key) -> Option<i64> {
        self.entries.get(feed).copied()
    }

    pub fn entries(&self) -> &BTreeMap<Key, i64> {
        &self.entries
    }

    pub fn rejected(&self) -> &[RejectedFeedEntry] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> BTreeMap<Key, i64> {
        self.entries
    }
}

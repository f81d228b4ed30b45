//! Remote peers and their multiserver addresses

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::identity::Key;

/// A peer reachable at `address` (`host:port`) and identified by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub key: Key,
    pub address: String,
}

impl Peer {
    pub fn new(key: Key, address: impl Into<String>) -> Self {
        Self {
            key,
            address: address.into(),
        }
    }

    /// Render the address the engine dials: `net:<address>~shs:<payload>`.
    pub fn multiserver_address(&self) -> BridgeResult<String> {
        let payload = self.key.payload().ok_or_else(|| {
            BridgeError::Addressing(format!("peer key {} has no payload", self.key))
        })?;
        Ok(format!("net:{}~shs:{}", self.address, payload))
    }
}

//! Engine notifications and their delivery to subscribers
//!
//! The engine fires callbacks from threads it owns, at any time and
//! possibly concurrently. Those callbacks land on a [`CallbackSink`], which
//! validates the payload and enqueues it without blocking. A single
//! delivery thread owned by the [`EventBus`] drains the queue and invokes
//! subscribers in FIFO order.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  engine threads ──► CallbackSink (bounds checks)                │
//! │                        │ unbounded mpsc (never blocks)          │
//! │                        ▼                                        │
//! │  EventBus delivery thread ──► handlers per Topic                │
//! │  ├── BlobReceived                                               │
//! │  ├── BearerToken                                                │
//! │  └── FsckProgress                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events for a topic with no subscriber at delivery time are discarded.

mod bus;
mod sink;

pub use bus::{EventBus, SubscriptionId};
pub use sink::CallbackSink;

use chrono::{DateTime, Utc};

use crate::identity::Key;

/// Notification channels exposed by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    BlobReceived,
    BearerToken,
    FsckProgress,
}

/// A validated engine notification
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A blob finished downloading into the local store
    BlobReceived {
        key: Key,
        /// Size in bytes as reported by the engine
        size: i64,
    },
    /// A service issued a bearer token
    BearerToken {
        token: String,
        expires_at: DateTime<Utc>,
    },
    /// Progress of a running FSCK repair
    FsckProgress {
        /// Completion, 0.0 to 100.0
        percent: f64,
        /// Engine's description of the remaining work
        remaining: String,
    },
}

impl BridgeEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BridgeEvent::BlobReceived { .. } => Topic::BlobReceived,
            BridgeEvent::BearerToken { .. } => Topic::BearerToken,
            BridgeEvent::FsckProgress { .. } => Topic::FsckProgress,
        }
    }
}

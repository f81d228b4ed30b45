//! Entry point for engine-originated callbacks

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::bus::{Envelope, Shared};
use super::BridgeEvent;
use crate::identity::Key;

/// Cloneable handle the engine calls into from its own threads.
///
/// Every method validates its payload, enqueues the event and returns
/// immediately; it never waits on subscriber code. The return value tells
/// whether the event was accepted.
#[derive(Clone)]
pub struct CallbackSink {
    shared: Arc<Shared>,
}

impl CallbackSink {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// A blob of `size` bytes identified by `reference` is now stored locally.
    pub fn blob_received(&self, size: i64, reference: &str) -> bool {
        if reference.trim().is_empty() {
            warn!(size, "dropping blob notification without reference");
            return false;
        }
        self.publish(BridgeEvent::BlobReceived {
            key: Key::new(reference),
            size,
        })
    }

    /// A bearer token valid until `expires_unix` (seconds since the epoch).
    ///
    /// Tokens that are empty or not strictly in the future are dropped.
    pub fn bearer_token(&self, token: &str, expires_unix: i64) -> bool {
        self.bearer_token_at(token, expires_unix, Utc::now())
    }

    fn bearer_token_at(&self, token: &str, expires_unix: i64, now: DateTime<Utc>) -> bool {
        if token.is_empty() {
            warn!("dropping empty bearer token");
            return false;
        }
        let Some(expires_at) = DateTime::<Utc>::from_timestamp(expires_unix, 0) else {
            warn!(expires_unix, "dropping bearer token with unrepresentable expiry");
            return false;
        };
        if expires_at <= now {
            warn!(%expires_at, "dropping expired bearer token");
            return false;
        }
        self.publish(BridgeEvent::BearerToken {
            token: token.to_string(),
            expires_at,
        })
    }

    /// FSCK repair progress.
    pub fn fsck_progress(&self, percent: f64, remaining: &str) -> bool {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            warn!(percent, "dropping out-of-range fsck progress");
            return false;
        }
        self.publish(BridgeEvent::FsckProgress {
            percent,
            remaining: remaining.to_string(),
        })
    }

    fn publish(&self, event: BridgeEvent) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            debug!(topic = ?event.topic(), "event bus closed, dropping event");
            return false;
        }
        self.shared.queue.send(Envelope::Event(event)).is_ok()
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

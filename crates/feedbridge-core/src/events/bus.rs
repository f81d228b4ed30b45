//! Topic-keyed subscriber registry and the delivery thread

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::sink::CallbackSink;
use super::{BridgeEvent, Topic};
use crate::identity::Key;

/// Name of the delivery thread
const DELIVERY_THREAD_NAME: &str = "feedbridge-events";

type Handler = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Handle returned by subscribe calls, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(super) enum Envelope {
    Event(BridgeEvent),
    Shutdown,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<Topic, Vec<(SubscriptionId, Handler)>>,
}

/// State shared between the bus, its sinks and the delivery thread.
pub(super) struct Shared {
    registry: RwLock<Registry>,
    pub(super) closed: AtomicBool,
    pub(super) queue: mpsc::UnboundedSender<Envelope>,
}

impl Shared {
    fn next_id(&self) -> SubscriptionId {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        SubscriptionId(registry.next_id)
    }

    fn insert(&self, id: SubscriptionId, topic: Topic, handler: Handler) {
        self.registry
            .write()
            .handlers
            .entry(topic)
            .or_default()
            .push((id, handler));
        debug!(%id, ?topic, "subscribed");
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        for handlers in registry.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sub, _)| *sub == id) {
                handlers.remove(pos);
                debug!(%id, "unsubscribed");
                return true;
            }
        }
        false
    }
}

/// Publish/subscribe hub for engine notifications.
///
/// Owned by the [`Bot`](crate::Bot); the engine only ever sees a
/// [`CallbackSink`]. Handlers run one at a time on the bus's delivery
/// thread, in the order events were enqueued.
///
/// # Example
///
/// ```ignore
/// let bus = EventBus::new();
/// let id = bus.on_blob_received(|key, size| println!("{key}: {size} bytes"));
///
/// let sink = bus.sink();
/// sink.blob_received(42, "&…=.sha256");
///
/// bus.unsubscribe(id);
/// ```
pub struct EventBus {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus and start its delivery thread.
    pub fn new() -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: RwLock::new(Registry::default()),
            closed: AtomicBool::new(false),
            queue,
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(DELIVERY_THREAD_NAME.to_string())
                .spawn(move || deliver(shared, rx))
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn event delivery thread, events will be dropped");
                shared.closed.store(true, Ordering::Release);
                None
            }
        };

        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// Handle for the engine's callbacks.
    pub fn sink(&self) -> CallbackSink {
        CallbackSink::new(self.shared.clone())
    }

    /// Register a handler for every event on `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_id();
        self.shared.insert(id, topic, Arc::new(handler));
        id
    }

    /// Receive events for `topic` on a channel instead of a callback.
    ///
    /// The channel closes when the subscription is removed or the bus
    /// shuts down. Dropping the receiver removes the subscription at the
    /// next event on `topic`.
    pub fn subscribe_channel(
        &self,
        topic: Topic,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_id();
        let shared = Arc::downgrade(&self.shared);
        let handler: Handler = Arc::new(move |event: &BridgeEvent| {
            if tx.send(event.clone()).is_err() {
                debug!(%id, "channel receiver dropped");
                if let Some(shared) = shared.upgrade() {
                    shared.remove(id);
                }
            }
        });
        self.shared.insert(id, topic, handler);
        (id, rx)
    }

    pub fn on_blob_received<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Key, i64) + Send + Sync + 'static,
    {
        self.subscribe(Topic::BlobReceived, move |event| {
            if let BridgeEvent::BlobReceived { key, size } = event {
                handler(key, *size);
            }
        })
    }

    pub fn on_bearer_token<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, DateTime<Utc>) + Send + Sync + 'static,
    {
        self.subscribe(Topic::BearerToken, move |event| {
            if let BridgeEvent::BearerToken { token, expires_at } = event {
                handler(token, *expires_at);
            }
        })
    }

    pub fn on_fsck_progress<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(f64, &str) + Send + Sync + 'static,
    {
        self.subscribe(Topic::FsckProgress, move |event| {
            if let BridgeEvent::FsckProgress { percent, remaining } = event {
                handler(*percent, remaining);
            }
        })
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.remove(id)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.shared
            .registry
            .read()
            .handlers
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop delivery and wait for the delivery thread to exit.
    ///
    /// Queued events are discarded and every subscription is removed.
    /// Once this returns no handler will be invoked again. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.queue.send(Envelope::Shutdown);

        if let Some(handle) = self.worker.lock().take() {
            // A handler tearing down its own bus cannot join itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("event delivery thread panicked");
            }
        }

        self.shared.registry.write().handlers.clear();
        info!("event bus shut down");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn deliver(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.blocking_recv() {
        let event = match envelope {
            Envelope::Event(event) => event,
            Envelope::Shutdown => break,
        };
        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        // Clone handlers out so subscribers may (un)subscribe from a handler
        let handlers: Vec<Handler> = shared
            .registry
            .read()
            .handlers
            .get(&event.topic())
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!(topic = ?event.topic(), "no subscribers, event discarded");
            continue;
        }

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(topic = ?event.topic(), "event handler panicked");
            }
        }
    }
    debug!("event delivery thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_handler_receives_blob_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        {
            let seen = seen.clone();
            let count = count.clone();
            bus.on_blob_received(move |key, size| {
                seen.lock().push((key.clone(), size));
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        let sink = bus.sink();
        assert!(sink.blob_received(5, "&AQIDBA==.sha256"));
        assert!(sink.blob_received(7, "&BQYHCA==.sha256"));
        wait_for(&count, 2);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Key::new("&AQIDBA==.sha256"), 5));
        assert_eq!(seen[1], (Key::new("&BQYHCA==.sha256"), 7));
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let blobs = Arc::new(AtomicUsize::new(0));
        let fsck = Arc::new(AtomicUsize::new(0));

        {
            let blobs = blobs.clone();
            bus.subscribe(Topic::BlobReceived, move |_| {
                blobs.fetch_add(1, Ordering::SeqCst);
            });
            let fsck = fsck.clone();
            bus.on_fsck_progress(move |_, _| {
                fsck.fetch_add(1, Ordering::SeqCst);
            });
        }

        let sink = bus.sink();
        sink.fsck_progress(10.0, "90 left");
        sink.fsck_progress(20.0, "80 left");
        sink.blob_received(1, "&AQIDBA==.sha256");
        wait_for(&blobs, 1);
        wait_for(&fsck, 2);

        assert_eq!(blobs.load(Ordering::SeqCst), 1);
        assert_eq!(fsck.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(Topic::BearerToken, |_| {});
        assert_eq!(bus.subscriber_count(Topic::BearerToken), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(Topic::BearerToken), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Topic::BlobReceived, |_| panic!("boom"));
        {
            let count = count.clone();
            bus.subscribe(Topic::BlobReceived, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        let sink = bus.sink();
        sink.blob_received(1, "&AQIDBA==.sha256");
        sink.blob_received(2, "&BQYHCA==.sha256");
        wait_for(&count, 2);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_delivery_after_shutdown() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            bus.subscribe(Topic::BlobReceived, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        let sink = bus.sink();

        bus.shutdown();
        bus.shutdown();
        assert!(bus.is_closed());

        sink.blob_received(1, "&AQIDBA==.sha256");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(Topic::BlobReceived), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription_closes_on_shutdown() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe_channel(Topic::FsckProgress);

        bus.sink().fsck_progress(42.0, "half way");
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(
            event,
            BridgeEvent::FsckProgress {
                percent: 42.0,
                remaining: "half way".to_string()
            }
        );

        bus.shutdown();
        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out");
        assert!(closed.is_none());
    }

    #[test]
    fn test_dropped_channel_receiver_unsubscribes() {
        let bus = EventBus::new();
        let (id, rx) = bus.subscribe_channel(Topic::BlobReceived);
        assert_eq!(bus.subscriber_count(Topic::BlobReceived), 1);
        drop(rx);

        bus.sink().blob_received(1, "&AQIDBA==.sha256");
        for _ in 0..200 {
            if bus.subscriber_count(Topic::BlobReceived) == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(bus.subscriber_count(Topic::BlobReceived), 0);
        assert!(!bus.unsubscribe(id));
    }
}

//! Process-wide home for the callback sink of a context-free C engine

use parking_lot::RwLock;
use tracing::warn;

use crate::events::CallbackSink;

/// Holds the sink of the one engine lifecycle a process may run.
///
/// A claim only succeeds while the slot is empty, so a refused second start
/// never disturbs the sink of the running engine.
pub(crate) struct SinkSlot {
    inner: RwLock<Option<CallbackSink>>,
}

impl SinkSlot {
    pub(crate) const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Install `sink` if no lifecycle holds the slot.
    pub(crate) fn claim(&self, sink: CallbackSink) -> bool {
        let mut slot = self.inner.write();
        if slot.is_some() {
            warn!("engine callbacks already claimed in this process");
            return false;
        }
        *slot = Some(sink);
        true
    }

    /// Empty the slot once the claiming lifecycle has ended.
    pub(crate) fn release(&self) {
        self.inner.write().take();
    }

    pub(crate) fn get(&self) -> Option<CallbackSink> {
        self.inner.read().clone()
    }
}

//! Lifecycle event sink.
//!
//! [`EventBus`] is the only process-wide observer point. The relays emit into
//! it whether or not anything listens. Synchronous [`EventListener`]s run
//! inline on the emitting task; async consumers use [`EventBus::subscribe`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use crate::events::BridgeEvent;

/// Broadcast capacity for async subscribers.
const DEFAULT_CAPACITY: usize = 1024;

/// Synchronous observer of lifecycle events.
pub trait EventListener: Send + Sync {
    /// Handle one record. Must not block for long: it runs on the relay task.
    fn on_event(&self, event: &BridgeEvent);
}

impl<F> EventListener for F
where
    F: Fn(&BridgeEvent) + Send + Sync,
{
    fn on_event(&self, event: &BridgeEvent) {
        self(event);
    }
}

/// Fan-out point for [`BridgeEvent`]s.
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Create a bus with the default subscriber capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose async subscribers lag after `capacity` undelivered events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Register a synchronous listener.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered synchronous listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    /// Deliver `event` to every listener, then to async subscribers.
    ///
    /// A panicking listener is logged and skipped.
    pub fn emit(&self, event: BridgeEvent) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if outcome.is_err() {
                warn!(event = event.event_type(), "event listener panicked, skipping");
            }
        }
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

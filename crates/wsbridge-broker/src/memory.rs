//! In-process pub/sub channel store.
//!
//! One `tokio::sync::broadcast` channel per name. Useful as a broker for
//! single-process deployments and for exercising the relays without Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};
use wsbridge_core::{BridgeError, BrokerPort, Subscription};

const CHANNEL_CAPACITY: usize = 1024;

/// Broker backed by in-memory broadcast channels.
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    connected: AtomicBool,
}

impl MemoryBroker {
    /// Create a connected, empty broker.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Whether the broker currently accepts operations.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Simulate the broker going away.
    ///
    /// Every live subscription ends and further operations fail with
    /// [`BridgeError::BrokerUnavailable`] until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.channels.lock().clear();
        debug!("memory broker disconnected");
    }

    /// Accept operations again after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::Release);
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn ensure_connected(&self) -> Result<(), BridgeError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BridgeError::broker("memory broker is disconnected"))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("channels", &self.channels.lock().len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl BrokerPort for MemoryBroker {
    fn driver(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        let sender = self.channels.lock().get(channel).cloned();
        if let Some(sender) = sender {
            // No subscribers is not an error for pub/sub
            let _ = sender.send(message.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BridgeError> {
        self.ensure_connected()?;
        let rx = self
            .channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let name = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let item = match item {
                Ok(message) => Some(Ok(message)),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(channel = %name, skipped, "memory subscriber lagged, messages dropped");
                    None
                }
            };
            futures::future::ready(item)
        });
        Ok(Subscription::new(channel, stream))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

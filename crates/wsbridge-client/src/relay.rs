//! Relay client: supervisor loop plus the sender and receiver tasks.
//!
//! ```text
//! INIT → CONNECTING → HANDSHAKING → ESTABLISHED → DRAINING → RECONNECT_WAIT → CONNECTING …
//!                          ↓ fail                                  ↑
//!                          └───────────────────────────────────────┘
//! ```
//!
//! Per established connection two tasks run:
//!
//! - **sender**: dedicated broker subscription on `channel.outgoing`, each
//!   delivery pushed as a text frame while the connection is up, dropped
//!   otherwise;
//! - **receiver**: reads frames, republishes non-empty text frames on
//!   `channel.incoming` in receipt order, ends on close or error.
//!
//! Both tasks share a child [`CancellationToken`] and hold a drop guard on
//! it, so whichever finishes first cancels its sibling. The supervisor
//! awaits both, aborting any that outlive [`TASK_DRAIN_TIMEOUT`], before
//! sleeping for the reconnect delay.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsbridge_core::callback::{guard, guard_async};
use wsbridge_core::{BridgeError, BridgeEvent, BrokerPort, ChannelPair, EventBus, Side};

use crate::connection::Connection;
use crate::frame::{Frame, Opcode};
use crate::transport::{ClientEndpoint, FrameStream, TransportError, WebSocketClientPort};

/// Wait between connection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long a cancelled relay task may take to stop before it is aborted.
pub const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervisor state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Constructed, not started.
    Init,
    /// Opening the transport.
    Connecting,
    /// HTTP upgrade in flight.
    Handshaking,
    /// Sender and receiver running.
    Established,
    /// Tearing down the tasks of the last connection.
    Draining,
    /// Sleeping before the next attempt.
    ReconnectWait,
    /// `start` returned after shutdown.
    Stopped,
}

type OpenHook = Arc<dyn Fn(&str, u16) + Send + Sync>;
type SendHook = Arc<dyn Fn(Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;
type MessageHook = Arc<dyn Fn(&str, &str, Opcode) + Send + Sync>;
type FailureHook = Arc<dyn Fn(&str, i32) + Send + Sync>;

/// Single-slot user callbacks. Re-registering replaces the previous one.
#[derive(Default)]
struct Callbacks {
    on_open: RwLock<Option<OpenHook>>,
    on_send: RwLock<Option<SendHook>>,
    on_message: RwLock<Option<MessageHook>>,
    on_close: RwLock<Option<FailureHook>>,
    on_error: RwLock<Option<FailureHook>>,
}

/// State shared with the per-connection tasks.
struct Shared {
    channel: ChannelPair,
    broker: Arc<dyn BrokerPort>,
    events: Arc<EventBus>,
    callbacks: Callbacks,
}

impl Shared {
    fn emit(&self, event: BridgeEvent) {
        self.events.emit(event);
    }

    /// `ConnectionFailed` + `on_error`.
    fn failed(&self, failure: &str, code: i32) {
        warn!(%failure, code, "client connection failed");
        self.emit(BridgeEvent::ConnectionFailed {
            side: Side::Client,
            fd: None,
            failure: failure.to_string(),
            code,
        });
        let hook = self.callbacks.on_error.read().clone();
        if let Some(hook) = hook {
            let _ = guard("on_error", || hook(failure, code));
        }
    }

    /// `ConnectionClosed` + `on_close`.
    fn closed(&self, failure: &str, code: i32) {
        info!(%failure, code, "client connection closed");
        self.emit(BridgeEvent::ConnectionClosed {
            side: Side::Client,
            fd: None,
            failure: failure.to_string(),
            code,
        });
        let hook = self.callbacks.on_close.read().clone();
        if let Some(hook) = hook {
            let _ = guard("on_close", || hook(failure, code));
        }
    }
}

/// Outbound WebSocket relay with an unbounded reconnect loop.
pub struct RelayClient {
    endpoint: ClientEndpoint,
    transport: Arc<dyn WebSocketClientPort>,
    shared: Arc<Shared>,
    reconnect_delay: Duration,
    state: watch::Sender<ClientState>,
}

impl RelayClient {
    /// Bind a relay to an endpoint, a broker and an event sink.
    pub fn new(
        endpoint: ClientEndpoint,
        channel: ChannelPair,
        broker: Arc<dyn BrokerPort>,
        transport: Arc<dyn WebSocketClientPort>,
        events: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(ClientState::Init);
        Self {
            endpoint,
            transport,
            shared: Arc::new(Shared {
                channel,
                broker,
                events,
                callbacks: Callbacks::default(),
            }),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            state,
        }
    }

    /// Override the wait between attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Endpoint this relay dials.
    pub fn endpoint(&self) -> &ClientEndpoint {
        &self.endpoint
    }

    /// Bound broker channels.
    pub fn channel(&self) -> &ChannelPair {
        &self.shared.channel
    }

    /// Broker the relay publishes to and subscribes on.
    pub fn broker(&self) -> Arc<dyn BrokerPort> {
        Arc::clone(&self.shared.broker)
    }

    /// Watch supervisor state transitions.
    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Called with `(host, port)` once a connection is established.
    pub fn on_open<F>(&self, f: F)
    where
        F: Fn(&str, u16) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_open.write() = Some(Arc::new(f));
    }

    /// Called once per connection, before the relay tasks start, to push an
    /// initial greeting.
    pub fn on_send<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: SendHook =
            Arc::new(move |conn: Arc<Connection>| -> BoxFuture<'static, ()> { Box::pin(f(conn)) });
        *self.shared.callbacks.on_send.write() = Some(hook);
    }

    /// Called with `(channel, payload, opcode)` for every received text frame.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&str, &str, Opcode) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_message.write() = Some(Arc::new(f));
    }

    /// Called with `(failure, code)` when the peer closes the connection.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&str, i32) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_close.write() = Some(Arc::new(f));
    }

    /// Called with `(failure, code)` when an attempt or a broker operation fails.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&str, i32) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_error.write() = Some(Arc::new(f));
    }

    /// Run the supervisor until `shutdown` is cancelled.
    ///
    /// Never returns an error: every failure is reported through events and
    /// callbacks and followed by a reconnect.
    pub async fn start(&self, shutdown: CancellationToken) {
        info!(url = %self.endpoint.url(), outgoing = %self.shared.channel.outgoing, incoming = %self.shared.channel.incoming, "relay client starting");
        while !shutdown.is_cancelled() {
            self.attempt(&shutdown).await;

            self.set_state(ClientState::ReconnectWait);
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        self.set_state(ClientState::Stopped);
        info!("relay client stopped");
    }

    fn set_state(&self, state: ClientState) {
        debug!(?state, "client state");
        let _ = self.state.send_replace(state);
    }

    /// One CONNECTING → … → DRAINING cycle.
    async fn attempt(&self, shutdown: &CancellationToken) {
        self.set_state(ClientState::Connecting);
        self.set_state(ClientState::Handshaking);
        let upgrade = tokio::select! {
            () = shutdown.cancelled() => return,
            result = self.transport.upgrade(&self.endpoint) => result,
        };
        let link = match upgrade {
            Ok(link) => link,
            Err(e) => {
                // No tasks were spawned for this attempt
                self.shared.failed(&e.message, e.code);
                return;
            }
        };

        let connection = Arc::new(Connection::new(
            self.endpoint.host.clone(),
            self.endpoint.port,
            link.sink,
        ));
        self.set_state(ClientState::Established);
        self.shared.emit(BridgeEvent::ConnectionOpened {
            side: Side::Client,
            fd: None,
            peer: self.endpoint.peer(),
        });
        let on_open = self.shared.callbacks.on_open.read().clone();
        if let Some(hook) = on_open {
            let _ = guard("on_open", || hook(&self.endpoint.host, self.endpoint.port));
        }
        let on_send = self.shared.callbacks.on_send.read().clone();
        if let Some(hook) = on_send {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.set_state(ClientState::Draining);
                    connection.close().await;
                    return;
                }
                _ = guard_async("on_send", hook(Arc::clone(&connection))) => {}
            }
        }

        let cancel = shutdown.child_token();
        let sender = tokio::spawn(run_sender(
            Arc::clone(&self.shared),
            Arc::clone(&connection),
            cancel.clone(),
        ));
        let receiver = tokio::spawn(run_receiver(
            Arc::clone(&self.shared),
            Arc::clone(&connection),
            link.stream,
            cancel.clone(),
        ));

        cancel.cancelled().await;
        self.set_state(ClientState::Draining);
        for (name, mut task) in [("sender", sender), ("receiver", receiver)] {
            match tokio::time::timeout(TASK_DRAIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "relay task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "relay task did not stop, aborting");
                    task.abort();
                }
            }
        }
        connection.close().await;
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("endpoint", &self.endpoint)
            .field("channel", &self.shared.channel)
            .field("broker", &self.shared.broker.driver())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Broker `outgoing` → WebSocket.
async fn run_sender(shared: Arc<Shared>, connection: Arc<Connection>, cancel: CancellationToken) {
    let _sibling = cancel.clone().drop_guard();
    let outgoing = shared.channel.outgoing.as_str();

    let subscribed = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = shared.broker.subscribe(outgoing) => result,
    };
    let mut subscription = match subscribed {
        Ok(subscription) => subscription,
        Err(e) => {
            shared.failed(&e.failure(), e.code());
            return;
        }
    };
    debug!(channel = outgoing, "sender subscribed");

    loop {
        let delivery = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            delivery = subscription.next() => delivery,
        };
        let message = match delivery {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                shared.failed(&e.failure(), e.code());
                return;
            }
            None => {
                let e = BridgeError::broker(format!("subscription to {outgoing} ended"));
                shared.failed(&e.failure(), e.code());
                return;
            }
        };

        if !connection.is_connected() {
            debug!(channel = outgoing, "not connected, dropping message");
            continue;
        }
        shared.emit(BridgeEvent::MessageSent {
            side: Side::Client,
            channel: outgoing.to_string(),
            fd: None,
            payload: message.clone(),
        });
        // A full socket must not keep the sender from seeing cancellation
        let pushed = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            pushed = connection.push(&message) => pushed,
        };
        if let Err(e) = pushed {
            shared.failed(&e.message, e.code);
            return;
        }
    }
}

/// WebSocket → broker `incoming`.
async fn run_receiver(
    shared: Arc<Shared>,
    connection: Arc<Connection>,
    mut stream: FrameStream,
    cancel: CancellationToken,
) {
    let _sibling = cancel.clone().drop_guard();
    let incoming = shared.channel.incoming.as_str();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        let data = match next {
            Some(Ok(Frame::Text(data))) => data,
            Some(Ok(Frame::Close(info))) => {
                let (failure, code) = info.map_or_else(
                    || (String::new(), 0),
                    |i| (i.reason, i32::from(i.code)),
                );
                connection.mark_closed(&failure, code);
                shared.closed(&failure, code);
                return;
            }
            Some(Ok(other)) => {
                debug!(opcode = ?other.opcode(), "ignoring non-text frame");
                continue;
            }
            Some(Err(e)) => {
                connection.mark_closed(&e.message, e.code);
                shared.closed(&e.message, e.code);
                return;
            }
            None => {
                let e = TransportError::closed();
                connection.mark_closed(&e.message, e.code);
                shared.closed(&e.message, e.code);
                return;
            }
        };
        if data.is_empty() {
            continue;
        }

        shared.emit(BridgeEvent::MessageReceived {
            side: Side::Client,
            channel: incoming.to_string(),
            fd: None,
            payload: data.clone(),
        });
        let hook = shared.callbacks.on_message.read().clone();
        if let Some(hook) = hook {
            let _ = guard("on_message", || hook(incoming, &data, Opcode::Text));
        }
        if let Err(e) = shared.broker.publish(incoming, &data).await {
            shared.failed(&e.failure(), e.code());
            return;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

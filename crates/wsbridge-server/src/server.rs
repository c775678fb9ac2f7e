//! Relay server: accept loop, per-connection reader and writer, send and
//! broadcast.
//!
//! Received text frames are reported as `MessageReceived` on
//! `channel.outgoing` and handed to `on_message`; they are not published to
//! the broker. Publishing is left to the application.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wsbridge_client::{Frame, FrameSink, TransportError};
use wsbridge_core::callback::guard;
use wsbridge_core::{
    BridgeError, BridgeEvent, BrokerPort, ChannelPair, ConnectionId, ConnectionIdAllocator,
    EventBus, Side,
};

use crate::listener::{Accepted, Incoming, ServerEndpoint, WebSocketListenerPort};
use crate::table::{ConnectionTable, ServerConnection};

/// Bound on flushing queued frames and the close frame once a connection ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed accept, e.g. when the process is out of descriptors.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Upgrade handshake bound when `connect_timeout_ms` is not configured.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type StartHook = Arc<dyn Fn(SocketAddr) + Send + Sync>;
type FdHook = Arc<dyn Fn(ConnectionId) + Send + Sync>;
type MessageHook = Arc<dyn Fn(ConnectionId, &str) + Send + Sync>;
type FailureHook = Arc<dyn Fn(&str, i32) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_start: RwLock<Option<StartHook>>,
    on_open: RwLock<Option<FdHook>>,
    on_message: RwLock<Option<MessageHook>>,
    on_close: RwLock<Option<FdHook>>,
    on_error: RwLock<Option<FailureHook>>,
}

struct Shared {
    channel: ChannelPair,
    events: Arc<EventBus>,
    table: ConnectionTable,
    ids: ConnectionIdAllocator,
    send_queue: usize,
    handshake_timeout: Duration,
    callbacks: Callbacks,
}

impl Shared {
    fn failed(&self, fd: Option<ConnectionId>, failure: &str, code: i32) {
        self.events.emit(BridgeEvent::ConnectionFailed {
            side: Side::Server,
            fd,
            failure: failure.to_string(),
            code,
        });
        let hook = self.callbacks.on_error.read().clone();
        if let Some(hook) = hook {
            let _ = guard("on_error", || hook(failure, code));
        }
    }

    fn sent(&self, fd: ConnectionId, message: &str) {
        self.events.emit(BridgeEvent::MessageSent {
            side: Side::Server,
            channel: String::new(),
            fd: Some(fd),
            payload: message.to_string(),
        });
    }
}

/// Inbound WebSocket relay.
pub struct RelayServer {
    endpoint: ServerEndpoint,
    listener: Arc<dyn WebSocketListenerPort>,
    broker: Arc<dyn BrokerPort>,
    shared: Arc<Shared>,
}

impl RelayServer {
    /// Bind a relay to a listener endpoint, a broker and an event sink.
    pub fn new(
        endpoint: ServerEndpoint,
        channel: ChannelPair,
        broker: Arc<dyn BrokerPort>,
        listener: Arc<dyn WebSocketListenerPort>,
        events: Arc<EventBus>,
    ) -> Self {
        let send_queue = endpoint.options.send_queue.max(1);
        let handshake_timeout = endpoint
            .options
            .connect_timeout_ms
            .map_or(DEFAULT_HANDSHAKE_TIMEOUT, Duration::from_millis);
        Self {
            endpoint,
            listener,
            broker,
            shared: Arc::new(Shared {
                channel,
                events,
                table: ConnectionTable::new(),
                ids: ConnectionIdAllocator::new(),
                send_queue,
                handshake_timeout,
                callbacks: Callbacks::default(),
            }),
        }
    }

    /// Listener endpoint.
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Bound broker channels.
    pub fn channel(&self) -> &ChannelPair {
        &self.shared.channel
    }

    /// Broker handed to the application for publishing.
    pub fn broker(&self) -> Arc<dyn BrokerPort> {
        Arc::clone(&self.broker)
    }

    /// Called with the bound address once the listener is up.
    pub fn on_start<F>(&self, f: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_start.write() = Some(Arc::new(f));
    }

    /// Called with the fd of every upgraded connection.
    pub fn on_open<F>(&self, f: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_open.write() = Some(Arc::new(f));
    }

    /// Called with `(fd, payload)` for every received text frame.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(ConnectionId, &str) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_message.write() = Some(Arc::new(f));
    }

    /// Called with the fd of every connection that ends.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_close.write() = Some(Arc::new(f));
    }

    /// Called with `(failure, code)` on startup and per-connection failures.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&str, i32) + Send + Sync + 'static,
    {
        *self.shared.callbacks.on_error.write() = Some(Arc::new(f));
    }

    /// Bind the listener and invoke `on_start`.
    ///
    /// A failure invokes `on_error`, emits `ConnectionFailed` and is returned
    /// as [`BridgeError::ListenerStartupFailed`].
    pub async fn bind(&self) -> Result<Incoming, BridgeError> {
        let incoming = match self.listener.listen(&self.endpoint).await {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(address = %self.endpoint.address(), failure = %e.message, code = e.code, "listener startup failed");
                self.shared.failed(None, &e.message, e.code);
                return Err(BridgeError::ListenerStartupFailed {
                    message: e.message,
                    code: e.code,
                });
            }
        };
        info!(
            local_addr = %incoming.local_addr,
            tls = self.endpoint.tls.is_some(),
            channel = %self.shared.channel.outgoing,
            "relay server listening"
        );
        let hook = self.shared.callbacks.on_start.read().clone();
        if let Some(hook) = hook {
            let _ = guard("on_start", || hook(incoming.local_addr));
        }
        Ok(incoming)
    }

    /// Run the accept loop until `shutdown` is cancelled, then close every
    /// connection and wait for their tasks.
    pub async fn serve(&self, mut incoming: Incoming, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => break,
                next = incoming.connections.next() => next,
            };
            match next {
                Some(Ok(accepted)) => {
                    let _ = tracker.spawn(handle_connection(
                        Arc::clone(&self.shared),
                        accepted,
                        shutdown.child_token(),
                    ));
                }
                Some(Err(e)) => {
                    warn!(failure = %e.message, code = e.code, "accept failed");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
                None => break,
            }
        }
        drop(incoming);
        let _ = tracker.close();
        tracker.wait().await;
        info!("relay server stopped");
    }

    /// [`bind`](Self::bind) then [`serve`](Self::serve).
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        let incoming = self.bind().await?;
        self.serve(incoming, shutdown).await;
        Ok(())
    }

    /// Push `message` to `fd` if it is established; otherwise do nothing.
    ///
    /// Returns whether the frame was queued.
    pub fn send(&self, fd: ConnectionId, message: &str) -> bool {
        let Some(conn) = self.shared.table.get(fd) else {
            return false;
        };
        if !conn.is_established() {
            return false;
        }
        if conn.push(message) {
            self.shared.sent(fd, message);
            true
        } else {
            warn!(%fd, dropped = conn.drop_count(), "send queue full, message dropped");
            false
        }
    }

    /// Push `message` to every established connection.
    ///
    /// Returns the number of connections it was queued for.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        for conn in self.shared.table.snapshot() {
            if !conn.is_established() {
                continue;
            }
            if conn.push(message) {
                self.shared.sent(conn.fd(), message);
                delivered += 1;
            } else {
                warn!(fd = %conn.fd(), "send queue full, broadcast dropped");
            }
        }
        debug!(recipients = delivered, "broadcast");
        delivered
    }

    /// Whether `fd` is a live connection.
    pub fn is_established(&self, fd: ConnectionId) -> bool {
        self.shared.table.is_established(fd)
    }

    /// Snapshot of the established fds, ascending.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.shared
            .table
            .snapshot()
            .into_iter()
            .filter(|conn| conn.is_established())
            .map(|conn| conn.fd())
            .collect()
    }

    /// Number of connections in the table.
    pub fn connection_count(&self) -> usize {
        self.shared.table.len()
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("endpoint", &self.endpoint)
            .field("channel", &self.shared.channel)
            .field("broker", &self.broker.driver())
            .field("connections", &self.shared.table.len())
            .finish_non_exhaustive()
    }
}

async fn handle_connection(shared: Arc<Shared>, accepted: Accepted, cancel: CancellationToken) {
    let Accepted { peer, upgrade } = accepted;
    let upgrade = tokio::time::timeout(shared.handshake_timeout, upgrade);
    let link = tokio::select! {
        () = cancel.cancelled() => return,
        link = upgrade => link.unwrap_or_else(|_| {
            let ms = shared.handshake_timeout.as_millis();
            Err(TransportError::new(format!("websocket handshake timed out after {ms}ms"), 0))
        }),
    };
    let link = match link {
        Ok(link) => link,
        Err(e) => {
            debug!(%peer, failure = %e.message, "websocket upgrade failed");
            shared.failed(None, &e.message, e.code);
            return;
        }
    };

    let fd = shared.ids.allocate();
    let (tx, rx) = mpsc::channel(shared.send_queue);
    let conn = Arc::new(ServerConnection::new(fd, peer, tx));
    shared.table.insert(Arc::clone(&conn));
    let writer = tokio::spawn(run_writer(link.sink, rx));

    info!(%fd, %peer, "server connection opened");
    shared.events.emit(BridgeEvent::ConnectionOpened {
        side: Side::Server,
        fd: Some(fd),
        peer: peer.to_string(),
    });
    let hook = shared.callbacks.on_open.read().clone();
    if let Some(hook) = hook {
        let _ = guard("on_open", || hook(fd));
    }

    let mut stream = link.stream;
    let outgoing = shared.channel.outgoing.as_str();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Frame::Text(data))) => {
                shared.events.emit(BridgeEvent::MessageReceived {
                    side: Side::Server,
                    channel: outgoing.to_string(),
                    fd: Some(fd),
                    payload: data.clone(),
                });
                let hook = shared.callbacks.on_message.read().clone();
                if let Some(hook) = hook {
                    let _ = guard("on_message", || hook(fd, &data));
                }
            }
            Some(Ok(Frame::Close(info))) => {
                debug!(%fd, ?info, "peer closed");
                break;
            }
            Some(Ok(other)) => {
                debug!(%fd, opcode = ?other.opcode(), "ignoring non-text frame");
            }
            Some(Err(e)) => {
                debug!(%fd, failure = %e.message, code = e.code, "read failed");
                break;
            }
            None => break,
        }
    }

    conn.mark_closed();
    let _ = shared.table.remove(fd);
    drop(conn);
    finish_writer(fd, writer).await;

    let closed = TransportError::closed();
    info!(%fd, "server connection closed");
    shared.events.emit(BridgeEvent::ConnectionClosed {
        side: Side::Server,
        fd: Some(fd),
        failure: closed.message,
        code: closed.code,
    });
    let hook = shared.callbacks.on_close.read().clone();
    if let Some(hook) = hook {
        let _ = guard("on_close", || hook(fd));
    }
}

/// Drain the queue into the socket, then send CLOSE.
async fn run_writer(mut sink: FrameSink, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            debug!(failure = %e.message, "write failed");
            return;
        }
    }
    let _ = sink.send(Frame::Close(None)).await;
    let _ = sink.close().await;
}

async fn finish_writer(fd: ConnectionId, mut writer: tokio::task::JoinHandle<()>) {
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%fd, error = %e, "writer task ended abnormally"),
        Err(_) => {
            debug!(%fd, "writer did not drain in time");
            writer.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use futures::{FutureExt, SinkExt};
    use parking_lot::Mutex;
    use tokio::sync::broadcast;
    use wsbridge_broker::MemoryBroker;
    use wsbridge_client::WsLink;
    use wsbridge_settings::TransportOptions;

    const WAIT: Duration = Duration::from_secs(5);

    /// Test side of an accepted fake connection.
    struct Peer {
        to_server: fmpsc::UnboundedSender<Result<Frame, TransportError>>,
        from_server: fmpsc::UnboundedReceiver<Frame>,
    }

    impl Peer {
        fn send(&self, frame: Frame) {
            self.to_server.unbounded_send(Ok(frame)).unwrap();
        }

        async fn recv(&mut self) -> Option<Frame> {
            tokio::time::timeout(WAIT, self.from_server.next())
                .await
                .expect("timed out waiting for a frame")
        }
    }

    /// Listener whose connections are pushed by the test.
    struct FakeListener {
        fail: Option<TransportError>,
        incoming: Mutex<Option<fmpsc::UnboundedReceiver<Result<Accepted, TransportError>>>>,
    }

    #[async_trait]
    impl WebSocketListenerPort for FakeListener {
        async fn listen(&self, _endpoint: &ServerEndpoint) -> Result<Incoming, TransportError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            let connections = self.incoming.lock().take().expect("listen called twice");
            Ok(Incoming {
                local_addr: "127.0.0.1:9002".parse().unwrap(),
                connections: connections.boxed(),
            })
        }
    }

    struct Harness {
        server: Arc<RelayServer>,
        broker: Arc<MemoryBroker>,
        events: broadcast::Receiver<BridgeEvent>,
        accept: fmpsc::UnboundedSender<Result<Accepted, TransportError>>,
        shutdown: CancellationToken,
        next_port: u16,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_listener_failure(None)
        }

        fn with_listener_failure(fail: Option<TransportError>) -> Self {
            Self::build(fail, TransportOptions::default())
        }

        fn with_options(options: TransportOptions) -> Self {
            Self::build(None, options)
        }

        fn build(fail: Option<TransportError>, options: TransportOptions) -> Self {
            let broker = Arc::new(MemoryBroker::new());
            let bus = Arc::new(EventBus::new());
            let events = bus.subscribe();
            let (accept, rx) = fmpsc::unbounded();
            let listener = Arc::new(FakeListener {
                fail,
                incoming: Mutex::new(Some(rx)),
            });
            let endpoint = ServerEndpoint {
                host: "127.0.0.1".into(),
                port: 9002,
                tls: None,
                options,
            };
            let server = RelayServer::new(
                endpoint,
                ChannelPair::server(),
                broker.clone(),
                listener,
                bus,
            );
            Self {
                server: Arc::new(server),
                broker,
                events,
                accept,
                shutdown: CancellationToken::new(),
                next_port: 50000,
            }
        }

        async fn start(&self) -> tokio::task::JoinHandle<()> {
            let incoming = self.server.bind().await.unwrap();
            let server = Arc::clone(&self.server);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { server.serve(incoming, shutdown).await })
        }

        /// Accept a connection whose upgrade never completes.
        fn connect_hung(&mut self) {
            self.next_port += 1;
            let accepted = Accepted {
                peer: SocketAddr::from(([127, 0, 0, 1], self.next_port)),
                upgrade: futures::future::pending().boxed(),
            };
            self.accept.unbounded_send(Ok(accepted)).unwrap();
        }

        fn accept_error(&self, failure: &str, code: i32) {
            self.accept
                .unbounded_send(Err(TransportError::new(failure, code)))
                .unwrap();
        }

        fn connect_with(&mut self, upgrade: Result<(), TransportError>) -> Peer {
            let (to_server, server_rx) = fmpsc::unbounded();
            let (server_tx, from_server) = fmpsc::unbounded();
            let link = upgrade.map(|()| WsLink {
                sink: Box::pin(server_tx.sink_map_err(|_| TransportError::closed())),
                stream: Box::pin(server_rx),
            });
            self.next_port += 1;
            let accepted = Accepted {
                peer: SocketAddr::from(([127, 0, 0, 1], self.next_port)),
                upgrade: futures::future::ready(link).boxed(),
            };
            self.accept.unbounded_send(Ok(accepted)).unwrap();
            Peer {
                to_server,
                from_server,
            }
        }

        /// Connect a peer and wait until it is in the table.
        async fn connect(&mut self) -> (Peer, ConnectionId) {
            let peer = self.connect_with(Ok(()));
            let opened = self
                .wait_event(|e| matches!(e, BridgeEvent::ConnectionOpened { .. }))
                .await;
            (peer, opened.fd().unwrap())
        }

        async fn next_event(&mut self) -> BridgeEvent {
            tokio::time::timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event bus closed")
        }

        async fn wait_event(&mut self, pred: impl Fn(&BridgeEvent) -> bool) -> BridgeEvent {
            loop {
                let event = self.next_event().await;
                if pred(&event) {
                    return event;
                }
            }
        }
    }

    // ── Startup ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn startup_failure_is_reported_and_returned() {
        let mut h = Harness::with_listener_failure(Some(TransportError::new(
            "Address already in use (os error 98)",
            98,
        )));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        h.server.on_error(move |failure, code| sink.lock().push((failure.to_string(), code)));

        let err = h.server.run(CancellationToken::new()).await.unwrap_err();
        assert_matches!(err, BridgeError::ListenerStartupFailed { code: 98, .. });
        assert!(err.is_fatal());
        assert_matches!(
            h.next_event().await,
            BridgeEvent::ConnectionFailed { side: Side::Server, fd: None, code: 98, .. }
        );
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn on_start_receives_bound_address() {
        let h = Harness::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        h.server.on_start(move |addr| *slot.lock() = Some(addr));
        let task = h.start().await;
        assert_eq!(seen.lock().map(|a| a.port()), Some(9002));
        h.shutdown.cancel();
        task.await.unwrap();
    }

    // ── Connections ─────────────────────────────────────────────────

    #[tokio::test]
    async fn connections_get_increasing_fds() {
        let mut h = Harness::new();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let sink = opened.clone();
        h.server.on_open(move |fd| sink.lock().push(fd));
        let task = h.start().await;

        let (_a, fd_a) = h.connect().await;
        let (_b, fd_b) = h.connect().await;
        assert_eq!(fd_a, ConnectionId(1));
        assert_eq!(fd_b, ConnectionId(2));
        assert_eq!(*opened.lock(), vec![fd_a, fd_b]);
        assert_eq!(h.server.connections(), vec![fd_a, fd_b]);
        assert_eq!(h.server.connection_count(), 2);

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn text_frames_become_events_not_publishes() {
        let mut h = Harness::new();
        let mut outgoing = h.broker.subscribe("server:outgoing").await.unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        h.server
            .on_message(move |fd, data| sink.lock().push((fd, data.to_string())));
        let task = h.start().await;
        let (peer, fd) = h.connect().await;

        peer.send(Frame::Binary(vec![0xff]));
        peer.send(Frame::Text("hi".into()));
        assert_matches!(
            h.wait_event(|e| matches!(e, BridgeEvent::MessageReceived { .. })).await,
            BridgeEvent::MessageReceived { side: Side::Server, channel, fd: Some(got), payload }
                if channel == "server:outgoing" && got == fd && payload == "hi"
        );
        assert_eq!(*messages.lock(), vec![(fd, "hi".to_string())]);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), outgoing.next())
                .await
                .is_err()
        );

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_removes_connection() {
        let mut h = Harness::new();
        let closed = Arc::new(Mutex::new(Vec::new()));
        let sink = closed.clone();
        h.server.on_close(move |fd| sink.lock().push(fd));
        let task = h.start().await;
        let (peer, fd) = h.connect().await;

        peer.send(Frame::Close(None));
        assert_matches!(
            h.wait_event(|e| matches!(e, BridgeEvent::ConnectionClosed { .. })).await,
            BridgeEvent::ConnectionClosed { fd: Some(got), failure, code: 0, .. }
                if got == fd && failure == "connection is closed"
        );
        assert_eq!(*closed.lock(), vec![fd]);
        assert!(!h.server.is_established(fd));
        assert_eq!(h.server.connection_count(), 0);
        assert!(!h.server.send(fd, "late"));

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_upgrade_is_reported() {
        let mut h = Harness::new();
        let task = h.start().await;
        let _peer = h.connect_with(Err(TransportError::new("Handshake not finished", 0)));
        assert_matches!(
            h.wait_event(|e| e.is_failure()).await,
            BridgeEvent::ConnectionFailed { fd: None, failure, .. } if failure == "Handshake not finished"
        );
        assert_eq!(h.server.connection_count(), 0);

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_upgrade_times_out() {
        let mut h = Harness::with_options(TransportOptions {
            connect_timeout_ms: Some(2_000),
            ..TransportOptions::default()
        });
        let task = h.start().await;
        let started = tokio::time::Instant::now();
        h.connect_hung();
        assert_matches!(
            h.wait_event(|e| e.is_failure()).await,
            BridgeEvent::ConnectionFailed { fd: None, failure, .. } if failure.contains("handshake timed out")
        );
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(h.server.connection_count(), 0);

        // The accept loop is still serving
        let (_peer, fd) = h.connect().await;
        assert!(h.server.is_established(fd));

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn accept_errors_back_off() {
        let mut h = Harness::new();
        let task = h.start().await;
        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            h.accept_error("Too many open files (os error 24)", 24);
        }
        let (_peer, fd) = h.connect().await;
        assert!(h.server.is_established(fd));
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF * 3);

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_accept_backoff() {
        let h = Harness::new();
        let task = h.start().await;
        h.accept_error("Too many open files (os error 24)", 24);
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        h.shutdown.cancel();
        task.await.unwrap();
        assert!(started.elapsed() < ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn panicking_callback_keeps_connection() {
        let mut h = Harness::new();
        h.server.on_message(|_, _| panic!("handler bug"));
        let task = h.start().await;
        let (peer, fd) = h.connect().await;

        peer.send(Frame::Text("one".into()));
        peer.send(Frame::Text("two".into()));
        for expected in ["one", "two"] {
            assert_matches!(
                h.wait_event(|e| matches!(e, BridgeEvent::MessageReceived { .. })).await,
                BridgeEvent::MessageReceived { payload, .. } if payload == expected
            );
        }
        assert!(h.server.is_established(fd));

        h.shutdown.cancel();
        task.await.unwrap();
    }

    // ── Send and broadcast ──────────────────────────────────────────

    #[tokio::test]
    async fn send_pushes_to_one_connection() {
        let mut h = Harness::new();
        let task = h.start().await;
        let (mut a, fd_a) = h.connect().await;
        let (mut b, _fd_b) = h.connect().await;

        assert!(h.server.send(fd_a, "only-a"));
        assert_eq!(a.recv().await, Some(Frame::Text("only-a".into())));
        assert_matches!(
            h.next_event().await,
            BridgeEvent::MessageSent { channel, fd: Some(got), payload, .. }
                if channel.is_empty() && got == fd_a && payload == "only-a"
        );

        h.shutdown.cancel();
        task.await.unwrap();
        assert_eq!(b.recv().await, Some(Frame::Close(None)));
    }

    #[tokio::test]
    async fn send_to_unknown_fd_is_silent() {
        let mut h = Harness::new();
        let task = h.start().await;
        let (_peer, _fd) = h.connect().await;

        assert!(!h.server.send(ConnectionId(999), "x"));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), h.events.recv())
                .await
                .is_err()
        );

        h.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_reaches_each_connection_once() {
        let mut h = Harness::new();
        let task = h.start().await;
        let mut peers = Vec::new();
        for _ in 0..3 {
            peers.push(h.connect().await.0);
        }

        assert_eq!(h.server.broadcast("hello"), 3);
        for peer in &mut peers {
            assert_eq!(peer.recv().await, Some(Frame::Text("hello".into())));
        }
        let mut sent = 0;
        for _ in 0..3 {
            if matches!(h.next_event().await, BridgeEvent::MessageSent { .. }) {
                sent += 1;
            }
        }
        assert_eq!(sent, 3);

        h.shutdown.cancel();
        task.await.unwrap();
        for peer in &mut peers {
            assert_eq!(peer.recv().await, Some(Frame::Close(None)));
        }
    }

    #[tokio::test]
    async fn broadcast_skips_closed_connections() {
        let mut h = Harness::new();
        let task = h.start().await;
        let (mut live, _) = h.connect().await;
        let (gone, _) = h.connect().await;
        gone.send(Frame::Close(None));
        let _ = h
            .wait_event(|e| matches!(e, BridgeEvent::ConnectionClosed { .. }))
            .await;

        assert_eq!(h.server.broadcast("still here"), 1);
        assert_eq!(live.recv().await, Some(Frame::Text("still here".into())));

        h.shutdown.cancel();
        task.await.unwrap();
    }

    // ── Shutdown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_closes_connections_and_reports_them() {
        let mut h = Harness::new();
        let task = h.start().await;
        let (mut peer, fd) = h.connect().await;

        h.shutdown.cancel();
        task.await.unwrap();

        assert_eq!(peer.recv().await, Some(Frame::Close(None)));
        assert_matches!(
            h.wait_event(|e| matches!(e, BridgeEvent::ConnectionClosed { .. })).await,
            BridgeEvent::ConnectionClosed { fd: Some(got), .. } if got == fd
        );
        assert_eq!(h.server.connection_count(), 0);
    }
}

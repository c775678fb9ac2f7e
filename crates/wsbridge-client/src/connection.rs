//! Client-side connection handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::SinkExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::frame::Frame;
use crate::transport::{FrameSink, TransportError};

/// Bound on the close handshake when tearing a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// An established outbound WebSocket.
///
/// Owned by the supervisor for one connection attempt and shared with the
/// sender task and the `on_send` hook. Once it reports disconnected it
/// never reconnects; the next attempt builds a new one.
pub struct Connection {
    host: String,
    port: u16,
    connected: AtomicBool,
    last_error: Mutex<Option<(String, i32)>>,
    sink: tokio::sync::Mutex<FrameSink>,
}

impl Connection {
    /// Wrap the write half of an upgraded socket.
    pub fn new(host: impl Into<String>, port: u16, sink: FrameSink) -> Self {
        Self {
            host: host.into(),
            port,
            connected: AtomicBool::new(true),
            last_error: Mutex::new(None),
            sink: tokio::sync::Mutex::new(sink),
        }
    }

    /// Remote host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether frames may still be pushed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Last failure recorded on this connection.
    pub fn last_error(&self) -> Option<(String, i32)> {
        self.last_error.lock().clone()
    }

    /// Push a text frame.
    ///
    /// A write failure marks the connection disconnected.
    pub async fn push(&self, payload: &str) -> Result<(), TransportError> {
        self.push_frame(Frame::Text(payload.to_string())).await
    }

    /// Push an arbitrary frame.
    pub async fn push_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::closed());
        }
        let mut sink = self.sink.lock().await;
        match sink.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_closed(&e.message, e.code);
                Err(e)
            }
        }
    }

    /// Record a terminal failure and stop accepting pushes.
    pub fn mark_closed(&self, failure: &str, code: i32) {
        self.connected.store(false, Ordering::Release);
        let mut last = self.last_error.lock();
        if last.is_none() {
            *last = Some((failure.to_string(), code));
        }
    }

    /// Send a CLOSE frame (best effort) and shut the write half.
    pub async fn close(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        // A push stalled on a full socket holds the lock, so the wait for it
        // counts against the close bound too
        let shutdown = async {
            let mut sink = self.sink.lock().await;
            if was_connected {
                let _ = sink.send(Frame::Close(None)).await;
            }
            let _ = sink.close().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await.is_err() {
            debug!(host = %self.host, port = self.port, "close handshake timed out");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

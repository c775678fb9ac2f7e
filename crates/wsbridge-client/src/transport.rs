//! WebSocket client port and its `tokio-tungstenite` implementation.
//!
//! [`WebSocketClientPort::upgrade`] covers CONNECTING and HANDSHAKING: it
//! opens the TCP (or TLS) stream, performs the HTTP upgrade on the endpoint
//! path and hands back a frame sink and a frame stream.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;
use wsbridge_core::BridgeError;
use wsbridge_settings::{ClientEndpointSettings, TransportOptions};

use crate::frame::Frame;

/// Transport failure with the `(message, code)` pair reported in events.
///
/// `code` is the HTTP status of a rejected upgrade, the OS error number of
/// an I/O failure, or 0.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Failure message.
    pub message: String,
    /// Error code.
    pub code: i32,
}

impl TransportError {
    /// Build an error from parts.
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// The connection is no longer usable.
    pub fn closed() -> Self {
        Self::new("connection is closed", 0)
    }

    /// As a handshake failure.
    pub fn into_handshake(self) -> BridgeError {
        BridgeError::HandshakeFailed {
            message: self.message,
            code: self.code,
        }
    }

    /// As a transport-closed failure.
    pub fn into_closed(self) -> BridgeError {
        BridgeError::TransportClosed {
            message: self.message,
            code: self.code,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        let code = err.raw_os_error().unwrap_or(0);
        Self::new(err.to_string(), code)
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        let code = match &err {
            tungstenite::Error::Http(response) => i32::from(response.status().as_u16()),
            tungstenite::Error::Io(io) => io.raw_os_error().unwrap_or(0),
            _ => 0,
        };
        Self::new(err.to_string(), code)
    }
}

/// Write half of an upgraded connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Read half of an upgraded connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An upgraded WebSocket, split into its two halves.
pub struct WsLink {
    /// Frames to the peer.
    pub sink: FrameSink,
    /// Frames from the peer. End of stream is a terminal recv.
    pub stream: FrameStream,
}

impl WsLink {
    /// Split an upgraded `tokio-tungstenite` socket into frame halves.
    pub fn from_socket<S>(socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (write, read) = socket.split();
        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| futures::future::ready(Ok::<_, TransportError>(frame.into())));
        let stream = read.map(|item| item.map(Frame::from).map_err(TransportError::from));
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink").finish_non_exhaustive()
    }
}

/// Remote endpoint the client dials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientEndpoint {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Upgrade path.
    pub path: String,
    /// Use TLS.
    pub ssl: bool,
    /// Transport tuning.
    pub options: TransportOptions,
}

impl ClientEndpoint {
    /// `ws://` or `wss://` URL for the upgrade request.
    pub fn url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }

    /// `host:port`, as reported in `ConnectionOpened`.
    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ClientEndpointSettings> for ClientEndpoint {
    fn from(settings: &ClientEndpointSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            path: settings.path.clone(),
            ssl: settings.ssl,
            options: settings.options.clone(),
        }
    }
}

/// Capability to open WebSocket connections.
#[async_trait]
pub trait WebSocketClientPort: Send + Sync {
    /// Connect and perform the HTTP upgrade.
    async fn upgrade(&self, endpoint: &ClientEndpoint) -> Result<WsLink, TransportError>;
}

/// Map transport options onto the tungstenite configuration.
pub fn websocket_config(options: &TransportOptions) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    if let Some(size) = options.max_message_size {
        config = config.max_message_size(Some(size));
    }
    if let Some(size) = options.max_frame_size {
        config = config.max_frame_size(Some(size));
    }
    if let Some(size) = options.write_buffer_size {
        config = config.write_buffer_size(size);
    }
    config
}

/// [`WebSocketClientPort`] over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WebSocketClientPort for TungsteniteConnector {
    async fn upgrade(&self, endpoint: &ClientEndpoint) -> Result<WsLink, TransportError> {
        let url = endpoint.url();
        let config = websocket_config(&endpoint.options);
        debug!(%url, "upgrading");

        let connect = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(config), true);
        let (socket, response) = match endpoint.options.connect_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), connect)
                .await
                .map_err(|_| TransportError::new(format!("connect to {url} timed out after {ms}ms"), 0))??,
            None => connect.await?,
        };
        debug!(%url, status = %response.status(), "upgrade accepted");
        Ok(WsLink::from_socket(socket))
    }
}

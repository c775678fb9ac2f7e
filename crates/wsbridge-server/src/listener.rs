//! WebSocket listener port and its `tokio-tungstenite` implementation.
//!
//! [`WebSocketListenerPort::listen`] performs startup (bind plus TLS setup)
//! and yields a stream of accepted TCP connections. Each carries its own
//! pending upgrade so a slow handshake never blocks the accept loop.

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info};
use wsbridge_client::{TransportError, WsLink, websocket_config};
use wsbridge_settings::{ServerEndpointSettings, TransportOptions};

use crate::tls::load_tls_acceptor;

/// PEM paths for TLS termination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFiles {
    /// Certificate chain.
    pub cert_file: PathBuf,
    /// Private key.
    pub key_file: PathBuf,
}

/// Local address the server listens on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerEndpoint {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// TLS material, if enabled.
    pub tls: Option<TlsFiles>,
    /// Transport tuning.
    pub options: TransportOptions,
}

impl ServerEndpoint {
    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ServerEndpointSettings> for ServerEndpoint {
    fn from(settings: &ServerEndpointSettings) -> Self {
        let tls = settings.ssl.enabled().then(|| TlsFiles {
            cert_file: PathBuf::from(&settings.ssl.cert_file),
            key_file: PathBuf::from(&settings.ssl.key_file),
        });
        Self {
            host: settings.host.clone(),
            port: settings.port,
            tls,
            options: settings.options.clone(),
        }
    }
}

/// HTTP upgrade still to be performed on an accepted connection.
pub type PendingUpgrade = BoxFuture<'static, Result<WsLink, TransportError>>;

/// One accepted TCP connection.
pub struct Accepted {
    /// Remote address.
    pub peer: SocketAddr,
    /// TLS handshake (if any) and WebSocket upgrade.
    pub upgrade: PendingUpgrade,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// A started listener.
pub struct Incoming {
    /// Address actually bound.
    pub local_addr: SocketAddr,
    /// Accepted connections. Errors are per-accept and not terminal.
    pub connections: BoxStream<'static, Result<Accepted, TransportError>>,
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Capability to accept WebSocket connections.
#[async_trait]
pub trait WebSocketListenerPort: Send + Sync {
    /// Bind, set up TLS and start accepting.
    async fn listen(&self, endpoint: &ServerEndpoint) -> Result<Incoming, TransportError>;
}

/// [`WebSocketListenerPort`] over `tokio-tungstenite`, with optional
/// `tokio-rustls` termination.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteListener;

impl TungsteniteListener {
    /// Create a listener factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WebSocketListenerPort for TungsteniteListener {
    async fn listen(&self, endpoint: &ServerEndpoint) -> Result<Incoming, TransportError> {
        let tls = match &endpoint.tls {
            Some(files) => Some(load_tls_acceptor(&files.cert_file, &files.key_file)?),
            None => None,
        };
        let listener = TcpListener::bind(endpoint.address()).await?;
        let local_addr = listener.local_addr()?;
        let config = websocket_config(&endpoint.options);
        info!(%local_addr, tls = tls.is_some(), "websocket listener bound");

        let connections = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        })
        .map(move |accepted| -> Result<Accepted, TransportError> {
            let (stream, peer) = accepted?;
            debug!(%peer, "tcp connection accepted");
            Ok(Accepted {
                peer,
                upgrade: upgrade(stream, tls.clone(), config).boxed(),
            })
        })
        .boxed();

        Ok(Incoming {
            local_addr,
            connections,
        })
    }
}

async fn upgrade(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    config: WebSocketConfig,
) -> Result<WsLink, TransportError> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(stream).await?;
            let socket = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
            Ok(WsLink::from_socket(socket))
        }
        None => {
            let socket = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
            Ok(WsLink::from_socket(socket))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsbridge_settings::TlsSettings;

    fn endpoint(port: u16) -> ServerEndpoint {
        ServerEndpoint {
            host: "127.0.0.1".into(),
            port,
            tls: None,
            options: TransportOptions::default(),
        }
    }

    #[test]
    fn tls_follows_cert_file() {
        let mut settings = ServerEndpointSettings::default();
        assert_eq!(ServerEndpoint::from(&settings).tls, None);
        settings.ssl = TlsSettings {
            cert_file: "/etc/ws/cert.pem".into(),
            key_file: "/etc/ws/key.pem".into(),
        };
        let ep = ServerEndpoint::from(&settings);
        assert_eq!(
            ep.tls.as_ref().map(|t| t.cert_file.clone()),
            Some(PathBuf::from("/etc/ws/cert.pem"))
        );
        assert_eq!(ep.address(), "0.0.0.0:6001");
    }

    #[tokio::test]
    async fn ephemeral_port_is_reported() {
        let incoming = TungsteniteListener::new().listen(&endpoint(0)).await.unwrap();
        assert_eq!(incoming.local_addr.ip().to_string(), "127.0.0.1");
        assert_ne!(incoming.local_addr.port(), 0);
    }

    #[tokio::test]
    async fn port_in_use_fails_startup() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = TungsteniteListener::new()
            .listen(&endpoint(port))
            .await
            .unwrap_err();
        assert_ne!(err.code, 0);
    }

    #[tokio::test]
    async fn missing_tls_material_fails_startup() {
        let mut ep = endpoint(0);
        ep.tls = Some(TlsFiles {
            cert_file: "/nonexistent/cert.pem".into(),
            key_file: "/nonexistent/key.pem".into(),
        });
        let err = TungsteniteListener::new().listen(&ep).await.unwrap_err();
        assert!(err.message.contains("cert"));
    }

    #[tokio::test]
    async fn plain_tcp_peer_fails_upgrade() {
        let mut incoming = TungsteniteListener::new().listen(&endpoint(0)).await.unwrap();
        let addr = incoming.local_addr;
        let peer = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            drop(stream);
        });
        let accepted = incoming.connections.next().await.unwrap().unwrap();
        peer.await.unwrap();
        assert!(accepted.upgrade.await.is_err());
    }
}

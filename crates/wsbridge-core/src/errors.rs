//! Error kinds shared across the relay.

/// Errors surfaced by the broker adapters, the relays and their factories.
///
/// Each variant carries the `(failure, code)` pair that ends up in the
/// `ConnectionFailed` / `ConnectionClosed` events.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    // Fatal at startup
    /// Missing or unsupported driver, malformed settings.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Bind or TLS setup of the server listener failed.
    #[error("listener startup failed: {message}")]
    ListenerStartupFailed { message: String, code: i32 },

    // Absorbed into the client reconnect loop
    /// Broker connect, auth, publish or subscribe failed.
    #[error("broker unavailable: {message}")]
    BrokerUnavailable { message: String, code: i32 },
    /// WebSocket upgrade was rejected or the peer could not be reached.
    #[error("handshake failed: {message}")]
    HandshakeFailed { message: String, code: i32 },
    /// The peer went away: terminal recv, CLOSE frame or write failure.
    #[error("transport closed: {message}")]
    TransportClosed { message: String, code: i32 },

    /// A user callback panicked.
    #[error("callback failed: {0}")]
    CallbackFailed(String),
}

impl BridgeError {
    /// Shorthand for a [`BridgeError::BrokerUnavailable`] without an error code.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::BrokerUnavailable {
            message: message.into(),
            code: 0,
        }
    }

    /// Errors that must stop the process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid(_) | Self::ListenerStartupFailed { .. }
        )
    }

    /// Numeric code reported alongside the failure message.
    pub fn code(&self) -> i32 {
        match self {
            Self::ListenerStartupFailed { code, .. }
            | Self::BrokerUnavailable { code, .. }
            | Self::HandshakeFailed { code, .. }
            | Self::TransportClosed { code, .. } => *code,
            Self::ConfigInvalid(_) | Self::CallbackFailed(_) => 0,
        }
    }

    /// The bare failure message, without the kind prefix of `Display`.
    pub fn failure(&self) -> String {
        match self {
            Self::ConfigInvalid(message) | Self::CallbackFailed(message) => message.clone(),
            Self::ListenerStartupFailed { message, .. }
            | Self::BrokerUnavailable { message, .. }
            | Self::HandshakeFailed { message, .. }
            | Self::TransportClosed { message, .. } => message.clone(),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::ListenerStartupFailed { .. } => "listener_startup_failed",
            Self::BrokerUnavailable { .. } => "broker_unavailable",
            Self::HandshakeFailed { .. } => "handshake_failed",
            Self::TransportClosed { .. } => "transport_closed",
            Self::CallbackFailed(_) => "callback_failed",
        }
    }
}

/// Result alias used across the relay crates.
pub type Result<T> = std::result::Result<T, BridgeError>;

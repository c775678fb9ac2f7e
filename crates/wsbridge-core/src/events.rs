//! Lifecycle event records emitted by the relays.
//!
//! Records are value objects: created at the moment of the transition they
//! describe, handed to the [`EventBus`](crate::EventBus) and discarded.

use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

/// Which relay emitted an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The outbound relay client.
    Client,
    /// The inbound relay server.
    Server,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// A lifecycle notification.
///
/// `fd` is only present for server-side records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A WebSocket connection was established.
    ConnectionOpened {
        /// Emitting relay.
        side: Side,
        /// Server connection id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fd: Option<ConnectionId>,
        /// `host:port` of the other end.
        peer: String,
    },

    /// The connection ended: peer close, terminal recv, or server-side disconnect.
    ConnectionClosed {
        /// Emitting relay.
        side: Side,
        /// Server connection id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fd: Option<ConnectionId>,
        /// Failure message (may be empty on a clean close).
        failure: String,
        /// Close or error code.
        code: i32,
    },

    /// A connection attempt, a broker operation or the listener failed.
    ConnectionFailed {
        /// Emitting relay.
        side: Side,
        /// Server connection id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fd: Option<ConnectionId>,
        /// Failure message.
        failure: String,
        /// Error code.
        code: i32,
    },

    /// A text frame was read from a WebSocket.
    MessageReceived {
        /// Emitting relay.
        side: Side,
        /// Logical broker channel the frame is reported under.
        channel: String,
        /// Server connection id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fd: Option<ConnectionId>,
        /// Frame payload.
        payload: String,
    },

    /// A text frame is about to be pushed to a WebSocket.
    MessageSent {
        /// Emitting relay.
        side: Side,
        /// Logical broker channel the message came from (empty for direct server sends).
        channel: String,
        /// Server connection id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fd: Option<ConnectionId>,
        /// Frame payload.
        payload: String,
    },
}

impl BridgeEvent {
    /// Wire name of the record, as used in the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionOpened { .. } => "connection_opened",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::MessageReceived { .. } => "message_received",
            Self::MessageSent { .. } => "message_sent",
        }
    }

    /// Relay that emitted the record.
    pub fn side(&self) -> Side {
        match self {
            Self::ConnectionOpened { side, .. }
            | Self::ConnectionClosed { side, .. }
            | Self::ConnectionFailed { side, .. }
            | Self::MessageReceived { side, .. }
            | Self::MessageSent { side, .. } => *side,
        }
    }

    /// Server connection id, if any.
    pub fn fd(&self) -> Option<ConnectionId> {
        match self {
            Self::ConnectionOpened { fd, .. }
            | Self::ConnectionClosed { fd, .. }
            | Self::ConnectionFailed { fd, .. }
            | Self::MessageReceived { fd, .. }
            | Self::MessageSent { fd, .. } => *fd,
        }
    }

    /// Whether this record reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// Whether this record is message traffic rather than a lifecycle transition.
    pub fn is_traffic(&self) -> bool {
        matches!(
            self,
            Self::MessageReceived { .. } | Self::MessageSent { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

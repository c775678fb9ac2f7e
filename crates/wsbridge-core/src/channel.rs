//! Broker channel pair bound to a relay.

use serde::{Deserialize, Serialize};

/// The two broker channels a relay works with.
///
/// For the client, `outgoing` carries messages headed for the WebSocket peer
/// and `incoming` receives frames read from it. The server reports received
/// frames under `outgoing`. Names are opaque and passed verbatim to the
/// broker adapter, which applies its key prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPair {
    /// Channel drained towards the WebSocket (client) / reported for received frames (server).
    pub outgoing: String,
    /// Channel fed from the WebSocket (client).
    pub incoming: String,
}

impl ChannelPair {
    /// Build a pair from two channel names.
    pub fn new(outgoing: impl Into<String>, incoming: impl Into<String>) -> Self {
        Self {
            outgoing: outgoing.into(),
            incoming: incoming.into(),
        }
    }

    /// Default pair for client mode.
    pub fn client() -> Self {
        Self::new("client:outgoing", "client:incoming")
    }

    /// Default pair for server mode.
    pub fn server() -> Self {
        Self::new("server:outgoing", "server:incoming")
    }
}

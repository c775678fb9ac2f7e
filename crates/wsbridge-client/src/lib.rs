//! # wsbridge-client
//!
//! Outbound side of the bridge. A [`RelayClient`] dials one WebSocket
//! endpoint and keeps two broker channels in step with it:
//!
//! - messages published on `channel.outgoing` are pushed to the socket;
//! - text frames read from the socket are published on `channel.incoming`.
//!
//! Any failure tears the connection down and the supervisor retries after a
//! flat delay, forever, until shutdown.

#![deny(unsafe_code)]

pub mod connection;
pub mod factory;
pub mod frame;
pub mod relay;
pub mod transport;

pub use connection::Connection;
pub use factory::create_client;
pub use frame::{CloseInfo, Frame, Opcode};
pub use relay::{ClientState, DEFAULT_RECONNECT_DELAY, RelayClient, TASK_DRAIN_TIMEOUT};
pub use transport::{
    ClientEndpoint, FrameSink, FrameStream, TransportError, TungsteniteConnector,
    WebSocketClientPort, WsLink, websocket_config,
};

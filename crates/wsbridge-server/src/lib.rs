//! # wsbridge-server
//!
//! Inbound side of the bridge. A [`RelayServer`] accepts WebSocket
//! connections, assigns each an fd, reports traffic and lifecycle through
//! the event bus and lets the application push to one fd or to all.

#![deny(unsafe_code)]

pub mod factory;
pub mod listener;
pub mod server;
pub mod table;
pub mod tls;

pub use factory::create_server;
pub use listener::{
    Accepted, Incoming, PendingUpgrade, ServerEndpoint, TlsFiles, TungsteniteListener,
    WebSocketListenerPort,
};
pub use server::{ACCEPT_ERROR_BACKOFF, DEFAULT_HANDSHAKE_TIMEOUT, RelayServer};
pub use table::{ConnectionTable, ServerConnection};
pub use tls::load_tls_acceptor;

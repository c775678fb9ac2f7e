//! Established server connections, keyed by fd.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use wsbridge_client::Frame;
use wsbridge_core::ConnectionId;

/// One accepted, upgraded connection.
///
/// Outbound frames go through a bounded queue drained by the connection's
/// writer task; a full or closed queue drops the frame.
pub struct ServerConnection {
    fd: ConnectionId,
    peer: SocketAddr,
    tx: mpsc::Sender<Frame>,
    established: AtomicBool,
    dropped: AtomicU64,
}

impl ServerConnection {
    /// Wrap the sending half of a writer queue.
    pub fn new(fd: ConnectionId, peer: SocketAddr, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            fd,
            peer,
            tx,
            established: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Connection id.
    pub fn fd(&self) -> ConnectionId {
        self.fd
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the reader is still running and the writer still draining.
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Stop accepting frames.
    pub fn mark_closed(&self) {
        self.established.store(false, Ordering::Release);
    }

    /// Queue a text frame. Returns `false` if it was dropped.
    pub fn push(&self, message: &str) -> bool {
        if self.tx.try_send(Frame::Text(message.to_string())).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped on a full or closed queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("fd", &self.fd)
            .field("peer", &self.peer)
            .field("established", &self.is_established())
            .finish_non_exhaustive()
    }
}

/// The server's connection table.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: DashMap<ConnectionId, Arc<ServerConnection>>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn insert(&self, connection: Arc<ServerConnection>) {
        let _ = self.connections.insert(connection.fd(), connection);
    }

    /// Remove a connection, returning it if present.
    pub fn remove(&self, fd: ConnectionId) -> Option<Arc<ServerConnection>> {
        self.connections.remove(&fd).map(|(_, conn)| conn)
    }

    /// Look up a connection.
    pub fn get(&self, fd: ConnectionId) -> Option<Arc<ServerConnection>> {
        self.connections.get(&fd).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `fd` is present and established.
    pub fn is_established(&self, fd: ConnectionId) -> bool {
        self.get(fd).is_some_and(|conn| conn.is_established())
    }

    /// Point-in-time copy of the table, ordered by fd.
    pub fn snapshot(&self) -> Vec<Arc<ServerConnection>> {
        let mut conns: Vec<_> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        conns.sort_by_key(|conn| conn.fd());
        conns
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

//! Event listener that writes lifecycle records to `tracing`.

use tracing::{debug, info, warn};
use wsbridge_core::{BridgeEvent, EventListener};

/// Logs every [`BridgeEvent`] as a structured line.
///
/// Lifecycle transitions log at `info`, failures at `warn`, message traffic
/// at `debug` (or `info` when `verbose`).
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventListener {
    verbose: bool,
}

impl TracingEventListener {
    /// Listener that keeps traffic at `debug`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener that promotes traffic to `info` (the CLI `--debug` flag).
    pub fn verbose(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl EventListener for TracingEventListener {
    fn on_event(&self, event: &BridgeEvent) {
        let side = event.side();
        let fd = event.fd().map(|fd| fd.0);
        match event {
            BridgeEvent::ConnectionOpened { peer, .. } => {
                info!(%side, ?fd, %peer, "connection opened");
            }
            BridgeEvent::ConnectionClosed { failure, code, .. } => {
                info!(%side, ?fd, %failure, code, "connection closed");
            }
            BridgeEvent::ConnectionFailed { failure, code, .. } => {
                warn!(%side, ?fd, %failure, code, "connection failed");
            }
            BridgeEvent::MessageReceived {
                channel, payload, ..
            } => {
                if self.verbose {
                    info!(%side, ?fd, %channel, %payload, "received message");
                } else {
                    debug!(%side, ?fd, %channel, bytes = payload.len(), "received message");
                }
            }
            BridgeEvent::MessageSent {
                channel, payload, ..
            } => {
                if self.verbose {
                    info!(%side, ?fd, %channel, %payload, "sent message");
                } else {
                    debug!(%side, ?fd, %channel, bytes = payload.len(), "sent message");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::capture;
    use tracing::Level;
    use wsbridge_core::{ConnectionId, Side};

    fn received() -> BridgeEvent {
        BridgeEvent::MessageReceived {
            side: Side::Server,
            channel: "server:outgoing".into(),
            fd: Some(ConnectionId(1)),
            payload: "hello".into(),
        }
    }

    #[test]
    fn failures_log_at_warn() {
        let (logs, _guard) = capture();
        TracingEventListener::new().on_event(&BridgeEvent::ConnectionFailed {
            side: Side::Client,
            fd: None,
            failure: "Connection refused".into(),
            code: 111,
        });
        let line = logs.find(Level::WARN, "connection failed").unwrap();
        assert_eq!(line.field("failure"), Some("Connection refused"));
        assert_eq!(line.field("code"), Some("111"));
    }

    #[test]
    fn traffic_is_debug_by_default() {
        let (logs, _guard) = capture();
        TracingEventListener::new().on_event(&received());
        let line = logs.find(Level::DEBUG, "received message").unwrap();
        assert_eq!(line.field("bytes"), Some("5"));
        assert_eq!(line.field("payload"), None);
        assert_eq!(logs.count(Level::INFO), 0);
    }

    #[test]
    fn verbose_promotes_traffic_to_info() {
        let (logs, _guard) = capture();
        TracingEventListener::verbose(true).on_event(&received());
        let line = logs.find(Level::INFO, "received message").unwrap();
        assert_eq!(line.field("payload"), Some("hello"));
        assert_eq!(line.field("fd"), Some("Some(1)"));
    }

    #[test]
    fn lifecycle_logs_at_info() {
        let (logs, _guard) = capture();
        TracingEventListener::new().on_event(&BridgeEvent::ConnectionOpened {
            side: Side::Client,
            fd: None,
            peer: "127.0.0.1:9001".into(),
        });
        let line = logs.find(Level::INFO, "connection opened").unwrap();
        assert_eq!(line.field("side"), Some("client"));
    }
}

//! Settings tree.
//!
//! Each relay section names its active `driver` and keeps one endpoint block
//! per driver under the driver's name, so a file can carry several
//! alternatives side by side:
//!
//! ```json
//! { "client": { "driver": "tungstenite", "tungstenite": { "port": 9001 } } }
//! ```

mod broker;
mod client;
mod logging;
mod server;

pub use broker::{BrokerEndpointSettings, BrokerOptions, BrokerSettings};
pub use client::{ClientEndpointSettings, ClientSettings};
pub use logging::LoggingSettings;
pub use server::{ServerEndpointSettings, ServerSettings, TlsSettings};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Outbound relay.
    pub client: ClientSettings,
    /// Inbound relay.
    pub server: ServerSettings,
    /// Pub/sub broker.
    pub broker: BrokerSettings,
    /// Diagnostics output.
    pub logging: LoggingSettings,
}

/// WebSocket transport tuning shared by client and server endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Largest accepted message, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    /// Largest accepted single frame, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    /// Outgoing bytes buffered before a flush.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_buffer_size: Option<usize>,
    /// Bound on TCP connect + upgrade for the client, and on the upgrade
    /// handshake of an accepted server connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Per-connection outbound queue bound (server only).
    pub send_queue: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_message_size: None,
            max_frame_size: None,
            write_buffer_size: None,
            connect_timeout_ms: None,
            send_queue: 256,
        }
    }
}

/// Look up the block for `driver` in a section's driver map.
pub(crate) fn lookup<'a, T>(
    section: &'static str,
    drivers: &'a BTreeMap<String, T>,
    driver: &str,
) -> Result<&'a T> {
    drivers
        .get(driver)
        .ok_or_else(|| SettingsError::UnknownDriver {
            section,
            driver: driver.to_string(),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Server relay settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wsbridge_core::ChannelPair;

use super::{TransportOptions, lookup};
use crate::errors::Result;

/// Inbound relay section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Active listener driver.
    pub driver: String,
    /// Broker channels bound to the relay.
    pub channel: ChannelPair,
    /// Listener blocks keyed by driver name.
    #[serde(flatten)]
    pub drivers: BTreeMap<String, ServerEndpointSettings>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let mut drivers = BTreeMap::new();
        let _ = drivers.insert("tungstenite".to_string(), ServerEndpointSettings::default());
        Self {
            driver: "tungstenite".to_string(),
            channel: ChannelPair::server(),
            drivers,
        }
    }
}

impl ServerSettings {
    /// Listener of the active driver.
    pub fn endpoint(&self) -> Result<&ServerEndpointSettings> {
        lookup("server", &self.drivers, &self.driver)
    }

    /// Mutable listener of the active driver, created from defaults if absent.
    pub fn endpoint_mut(&mut self) -> &mut ServerEndpointSettings {
        self.drivers.entry(self.driver.clone()).or_default()
    }
}

/// Local listener address and TLS material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEndpointSettings {
    /// Bind host.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// TLS certificate and key.
    pub ssl: TlsSettings,
    /// Transport tuning.
    pub options: TransportOptions,
}

impl Default for ServerEndpointSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6001,
            ssl: TlsSettings::default(),
            options: TransportOptions::default(),
        }
    }
}

/// PEM files enabling TLS on the listener.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Certificate chain. TLS is on when this is non-empty.
    pub cert_file: String,
    /// Private key.
    pub key_file: String,
}

impl TlsSettings {
    /// Whether the listener should terminate TLS.
    pub fn enabled(&self) -> bool {
        !self.cert_file.is_empty()
    }
}

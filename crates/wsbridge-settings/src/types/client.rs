//! Client relay settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wsbridge_core::ChannelPair;

use super::{TransportOptions, lookup};
use crate::errors::Result;

/// Outbound relay section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Active transport driver.
    pub driver: String,
    /// Broker channels bound to the relay.
    pub channel: ChannelPair,
    /// Endpoint blocks keyed by driver name.
    #[serde(flatten)]
    pub drivers: BTreeMap<String, ClientEndpointSettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let mut drivers = BTreeMap::new();
        let _ = drivers.insert("tungstenite".to_string(), ClientEndpointSettings::default());
        Self {
            driver: "tungstenite".to_string(),
            channel: ChannelPair::client(),
            drivers,
        }
    }
}

impl ClientSettings {
    /// Endpoint of the active driver.
    pub fn endpoint(&self) -> Result<&ClientEndpointSettings> {
        lookup("client", &self.drivers, &self.driver)
    }

    /// Mutable endpoint of the active driver, created from defaults if absent.
    pub fn endpoint_mut(&mut self) -> &mut ClientEndpointSettings {
        self.drivers.entry(self.driver.clone()).or_default()
    }
}

/// Remote WebSocket endpoint the client dials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEndpointSettings {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Upgrade path.
    pub path: String,
    /// Use `wss://`.
    pub ssl: bool,
    /// Transport tuning.
    pub options: TransportOptions,
}

impl Default for ClientEndpointSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6001,
            path: "/".to_string(),
            ssl: false,
            options: TransportOptions::default(),
        }
    }
}

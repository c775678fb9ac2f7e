//! Broker settings.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::lookup;
use crate::errors::Result;

/// Broker section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Active broker driver.
    pub driver: String,
    /// Connection blocks keyed by driver name.
    #[serde(flatten)]
    pub drivers: BTreeMap<String, BrokerEndpointSettings>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        let mut drivers = BTreeMap::new();
        let _ = drivers.insert("redis".to_string(), BrokerEndpointSettings::default());
        Self {
            driver: "redis".to_string(),
            drivers,
        }
    }
}

impl BrokerSettings {
    /// Connection block for `driver`.
    pub fn endpoint(&self, driver: &str) -> Result<&BrokerEndpointSettings> {
        lookup("broker", &self.drivers, driver)
    }

    /// Mutable connection block for `driver`, created from defaults if absent.
    pub fn endpoint_mut(&mut self, driver: &str) -> &mut BrokerEndpointSettings {
        self.drivers.entry(driver.to_string()).or_default()
    }
}

/// Broker server address and options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerEndpointSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Credentials, key prefix and publisher timeout.
    pub options: BrokerOptions,
}

impl Default for BrokerEndpointSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            options: BrokerOptions::default(),
        }
    }
}

/// Broker connection options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    /// ACL username (used only together with a password).
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Prepended to every channel name.
    pub prefix: Option<String>,
    /// Publisher read timeout in seconds. `0` keeps the transport default.
    pub timeout: f64,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            prefix: Some("websocket:".to_string()),
            timeout: 0.0,
        }
    }
}

impl BrokerOptions {
    /// Publisher timeout, `None` when unset, non-positive or out of range.
    pub fn publish_timeout(&self) -> Option<Duration> {
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            return None;
        }
        match Duration::try_from_secs_f64(self.timeout) {
            Ok(timeout) => Some(timeout),
            Err(e) => {
                warn!(timeout = self.timeout, error = %e, "ignoring unrepresentable broker timeout");
                None
            }
        }
    }
}

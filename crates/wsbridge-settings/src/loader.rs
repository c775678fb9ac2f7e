//! Resolving [`BridgeSettings`] from the file and the environment.
//!
//! The settings file is a partial document: only the keys it names replace
//! the compiled defaults. Nested sections combine key by key, so a file that
//! sets `client.tungstenite.port` keeps the default host and path. Lists and
//! scalars are taken whole and an explicit `null` leaves the default alone.
//!
//! Environment variables are applied on top of the file. Command-line
//! [`Overrides`] are applied by the caller last.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BridgeSettings;

/// `~/.wsbridge/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wsbridge").join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<BridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// File layer plus process environment.
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults with the file at `path` laid over them.
pub fn load_file(path: &Path) -> Result<BridgeSettings> {
    let mut tree = serde_json::to_value(BridgeSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "applying settings file");
            merge_layer(&mut tree, serde_json::from_str(&text)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(serde_json::from_value(tree)?)
}

/// Lay `layer` over `base` in place.
pub fn merge_layer(base: &mut Value, layer: Value) {
    let Value::Object(entries) = layer else {
        *base = layer;
        return;
    };
    let fields = match base {
        Value::Object(fields) => fields,
        other => {
            *other = Value::Object(entries);
            return;
        }
    };
    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        match fields.get_mut(&key) {
            Some(slot) => merge_layer(slot, value),
            None => {
                let _ = fields.insert(key, value);
            }
        }
    }
}

/// Apply `WS_*`, `REDIS_*` and `WSBRIDGE_LOG_LEVEL` from the process
/// environment.
pub fn apply_env_overrides(settings: &mut BridgeSettings) {
    apply_env(settings, |key| std::env::var(key).ok());
}

/// Apply environment overrides read through `lookup`.
///
/// Driver selectors are applied before endpoint values so those land in the
/// newly selected driver's block. A section's block is only touched when
/// one of its variables is set. Unparseable values are skipped with a
/// warning.
pub fn apply_env(settings: &mut BridgeSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader(lookup);

    if let Some(driver) = env.text("WS_CLIENT_DRIVER") {
        settings.client.driver = driver;
    }
    let host = env.text("WS_CLIENT_HOST");
    let port = env.port("WS_CLIENT_PORT");
    let path = env.text("WS_CLIENT_PATH");
    let ssl = env.flag("WS_CLIENT_SSL");
    if host.is_some() || port.is_some() || path.is_some() || ssl.is_some() {
        let endpoint = settings.client.endpoint_mut();
        set(&mut endpoint.host, host);
        set(&mut endpoint.port, port);
        set(&mut endpoint.path, path);
        set(&mut endpoint.ssl, ssl);
    }

    if let Some(driver) = env.text("WS_SERVER_DRIVER") {
        settings.server.driver = driver;
    }
    let host = env.text("WS_SERVER_HOST");
    let port = env.port("WS_SERVER_PORT");
    let cert = env.text("WS_SERVER_SSL_CERT_FILE");
    let key = env.text("WS_SERVER_SSL_KEY_FILE");
    if host.is_some() || port.is_some() || cert.is_some() || key.is_some() {
        let endpoint = settings.server.endpoint_mut();
        set(&mut endpoint.host, host);
        set(&mut endpoint.port, port);
        set(&mut endpoint.ssl.cert_file, cert);
        set(&mut endpoint.ssl.key_file, key);
    }

    if let Some(driver) = env.text("WS_BROKER_DRIVER") {
        settings.broker.driver = driver;
    }
    let host = env.text("REDIS_HOST");
    let port = env.port("REDIS_PORT");
    let username = env.text("REDIS_USERNAME");
    let password = env.text("REDIS_PASSWORD");
    if host.is_some() || port.is_some() || username.is_some() || password.is_some() {
        let redis = settings.broker.endpoint_mut("redis");
        set(&mut redis.host, host);
        set(&mut redis.port, port);
        if username.is_some() {
            redis.options.username = username;
        }
        if password.is_some() {
            redis.options.password = password;
        }
    }

    set(&mut settings.logging.level, env.text("WSBRIDGE_LOG_LEVEL"));
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Typed access to string-valued variables.
struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn port(&self, key: &str) -> Option<u16> {
        let raw = self.text(key)?;
        match raw.trim().parse::<u16>() {
            Ok(port) if port > 0 => Some(port),
            _ => {
                warn!(key, value = %raw, "ignoring port outside 1-65535");
                None
            }
        }
    }

    fn flag(&self, key: &str) -> Option<bool> {
        let raw = self.text(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                warn!(key, value = %raw, "ignoring non-boolean value");
                None
            }
        }
    }
}

/// Command-line overrides shared by the `client` and `server` commands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Broker driver.
    pub broker: Option<String>,
    /// Transport driver.
    pub driver: Option<String>,
    /// Endpoint host.
    pub host: Option<String>,
    /// Endpoint port.
    pub port: Option<u16>,
}

impl Overrides {
    /// Apply to the client section and the broker driver.
    pub fn apply_client(&self, settings: &mut BridgeSettings) {
        set(&mut settings.broker.driver, self.broker.clone());
        set(&mut settings.client.driver, self.driver.clone());
        if self.touches_endpoint() {
            let endpoint = settings.client.endpoint_mut();
            set(&mut endpoint.host, self.host.clone());
            set(&mut endpoint.port, self.port);
        }
    }

    /// Apply to the server section and the broker driver.
    pub fn apply_server(&self, settings: &mut BridgeSettings) {
        set(&mut settings.broker.driver, self.broker.clone());
        set(&mut settings.server.driver, self.driver.clone());
        if self.touches_endpoint() {
            let endpoint = settings.server.endpoint_mut();
            set(&mut endpoint.host, self.host.clone());
            set(&mut endpoint.port, self.port);
        }
    }

    fn touches_endpoint(&self) -> bool {
        self.host.is_some() || self.port.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

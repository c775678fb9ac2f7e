//! Configuration failures.

use thiserror::Error;
use wsbridge_core::BridgeError;

/// Why the bridge could not be configured.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON or has mistyped values.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is syntactically fine but unusable.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// A section selects a driver it has no block for.
    #[error("unsupported {section} driver: {driver}")]
    UnknownDriver {
        /// `client`, `server` or `broker`.
        section: &'static str,
        /// Selected driver.
        driver: String,
    },
}

/// Settings result.
pub type Result<T> = std::result::Result<T, SettingsError>;

impl From<SettingsError> for BridgeError {
    fn from(err: SettingsError) -> Self {
        BridgeError::ConfigInvalid(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

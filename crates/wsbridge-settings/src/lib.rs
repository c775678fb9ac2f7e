//! # wsbridge-settings
//!
//! Layered configuration for the bridge.
//!
//! Settings are loaded from four layers (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **Settings file**: `~/.wsbridge/settings.json` or `--config` (deep-merged over defaults)
//! 3. **Environment variables**: `WS_*`, `REDIS_*`, `WSBRIDGE_LOG_LEVEL`
//! 4. **Command-line flags**: [`Overrides`]
//!
//! Driver blocks are looked up by the section's `driver` key; a driver
//! without a block is [`SettingsError::UnknownDriver`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    Overrides, apply_env, apply_env_overrides, load_file, load_settings, load_settings_from_path,
    merge_layer, settings_path,
};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

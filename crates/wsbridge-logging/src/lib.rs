//! # wsbridge-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_logging`] installs the global subscriber (compact text or JSON on stderr)
//! - [`TracingEventListener`] turns lifecycle events into log lines
//! - [`test_utils::capture`] records log lines in memory for assertions

#![deny(unsafe_code)]

pub mod listener;
pub mod test_utils;

pub use listener::TracingEventListener;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wsbridge_settings::LoggingSettings;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `settings.level`. Call once at startup; subsequent
/// calls are no-ops.
pub fn init_logging(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let json_layer = settings.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!settings.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
    });

    // set_global_default fails if already set
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

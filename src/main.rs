//! # wsbridge
//!
//! Bridge binary: runs the relay client or the relay server against the
//! configured broker until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use wsbridge_broker::create_broker;
use wsbridge_client::{RelayClient, create_client};
use wsbridge_core::EventBus;
use wsbridge_logging::{TracingEventListener, init_logging};
use wsbridge_server::{RelayServer, create_server};
use wsbridge_settings::{BridgeSettings, Overrides, load_settings_from_path, settings_path};

/// WebSocket to pub/sub bridge.
#[derive(Parser, Debug)]
#[command(name = "wsbridge", version, about = "WebSocket <-> pub/sub broker bridge")]
struct Cli {
    /// Settings file (defaults to `~/.wsbridge/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `wsbridge_client=debug`. `RUST_LOG` wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dial a WebSocket server and relay it to the broker.
    #[command(alias = "websocket:client")]
    Client {
        #[command(flatten)]
        endpoint: EndpointArgs,

        /// Log every relayed message at info level.
        #[arg(long)]
        debug: bool,
    },
    /// Accept WebSocket connections and report them through the event sink.
    #[command(alias = "websocket:server")]
    Server {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct EndpointArgs {
    /// Broker driver (`redis`, `memory`).
    #[arg(long)]
    broker: Option<String>,

    /// Transport driver.
    #[arg(long)]
    driver: Option<String>,

    /// Endpoint host.
    #[arg(long)]
    host: Option<String>,

    /// Endpoint port.
    #[arg(long)]
    port: Option<u16>,
}

impl EndpointArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            broker: self.broker.clone(),
            driver: self.driver.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// File, environment and flags, in that order.
fn resolve_settings(cli: &Cli) -> Result<BridgeSettings> {
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    match &cli.command {
        Command::Client { endpoint, .. } => endpoint.overrides().apply_client(&mut settings),
        Command::Server { endpoint } => endpoint.overrides().apply_server(&mut settings),
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.log_json {
        settings.logging.json = true;
    }
    Ok(settings)
}

fn log_client_callbacks(client: &RelayClient) {
    client.on_open(|host, port| info!(%host, port, "connected to websocket server"));
    client.on_close(|failure, code| info!(%failure, code, "websocket server closed the connection"));
    client.on_error(|failure, code| info!(%failure, code, "websocket client error"));
}

fn log_server_callbacks(server: &RelayServer) {
    server.on_start(|addr| info!(%addr, "websocket server started"));
    server.on_open(|fd| info!(%fd, "websocket client connected"));
    server.on_message(|fd, payload| info!(%fd, %payload, "websocket message received"));
    server.on_close(|fd| info!(%fd, "websocket client disconnected"));
    server.on_error(|failure, code| info!(%failure, code, "websocket server error"));
}

async fn run_client(
    settings: &BridgeSettings,
    debug: bool,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
) -> Result<()> {
    events.add_listener(Arc::new(TracingEventListener::verbose(debug)));
    let broker = create_broker(&settings.broker, None)
        .await
        .context("Failed to create broker")?;
    let client =
        create_client(&settings.client, broker, events).context("Failed to create relay client")?;

    log_client_callbacks(&client);
    client.start(shutdown).await;
    Ok(())
}

async fn run_server(
    settings: &BridgeSettings,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
) -> Result<()> {
    events.add_listener(Arc::new(TracingEventListener::new()));
    let broker = create_broker(&settings.broker, None)
        .await
        .context("Failed to create broker")?;
    let server =
        create_server(&settings.server, broker, events).context("Failed to create relay server")?;

    log_server_callbacks(&server);
    server
        .run(shutdown)
        .await
        .context("Failed to start websocket server")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = resolve_settings(&cli)?;
    init_logging(&settings.logging);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        let _ = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
            }
            shutdown.cancel();
        });
    }

    let events = Arc::new(EventBus::new());
    match cli.command {
        Command::Client { debug, .. } => run_client(&settings, debug, events, shutdown).await,
        Command::Server { .. } => run_server(&settings, events, shutdown).await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

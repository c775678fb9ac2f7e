//! Server selection by listener driver name.

use std::sync::Arc;

use tracing::info;
use wsbridge_core::{BridgeError, BrokerPort, EventBus};
use wsbridge_settings::ServerSettings;

use crate::listener::{ServerEndpoint, TungsteniteListener, WebSocketListenerPort};
use crate::server::RelayServer;

/// Build a relay server for the active driver in `settings`.
pub fn create_server(
    settings: &ServerSettings,
    broker: Arc<dyn BrokerPort>,
    events: Arc<EventBus>,
) -> Result<RelayServer, BridgeError> {
    let endpoint = ServerEndpoint::from(settings.endpoint()?);
    let listener: Arc<dyn WebSocketListenerPort> = match settings.driver.as_str() {
        "tungstenite" => Arc::new(TungsteniteListener::new()),
        other => {
            return Err(BridgeError::ConfigInvalid(format!(
                "unsupported server driver: {other}"
            )));
        }
    };
    info!(driver = %settings.driver, address = %endpoint.address(), broker = broker.driver(), "creating relay server");
    Ok(RelayServer::new(
        endpoint,
        settings.channel.clone(),
        broker,
        listener,
        events,
    ))
}

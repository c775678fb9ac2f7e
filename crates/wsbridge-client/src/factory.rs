//! Client selection by transport driver name.

use std::sync::Arc;

use tracing::info;
use wsbridge_core::{BridgeError, BrokerPort, EventBus};
use wsbridge_settings::ClientSettings;

use crate::relay::RelayClient;
use crate::transport::{ClientEndpoint, TungsteniteConnector, WebSocketClientPort};

/// Build a relay client for the active driver in `settings`.
pub fn create_client(
    settings: &ClientSettings,
    broker: Arc<dyn BrokerPort>,
    events: Arc<EventBus>,
) -> Result<RelayClient, BridgeError> {
    let endpoint = ClientEndpoint::from(settings.endpoint()?);
    let transport: Arc<dyn WebSocketClientPort> = match settings.driver.as_str() {
        "tungstenite" => Arc::new(TungsteniteConnector::new()),
        other => {
            return Err(BridgeError::ConfigInvalid(format!(
                "unsupported client driver: {other}"
            )));
        }
    };
    info!(driver = %settings.driver, url = %endpoint.url(), broker = broker.driver(), "creating relay client");
    Ok(RelayClient::new(
        endpoint,
        settings.channel.clone(),
        broker,
        transport,
        events,
    ))
}

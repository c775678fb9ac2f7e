//! Broker selection by driver name.

use std::sync::Arc;

use tracing::info;
use wsbridge_core::{BridgeError, BrokerPort};
use wsbridge_settings::BrokerSettings;

use crate::memory::MemoryBroker;
use crate::redis_broker::{RedisBroker, RedisEndpoint};

/// Build the broker named by `driver_override`, or by `settings.driver`.
///
/// Unknown drivers are [`BridgeError::ConfigInvalid`]; a Redis broker that
/// cannot connect is [`BridgeError::BrokerUnavailable`].
pub async fn create_broker(
    settings: &BrokerSettings,
    driver_override: Option<&str>,
) -> Result<Arc<dyn BrokerPort>, BridgeError> {
    let driver = driver_override.unwrap_or(&settings.driver);
    info!(driver, "creating broker");
    match driver {
        "redis" => {
            let endpoint = RedisEndpoint::from(settings.endpoint(driver)?);
            Ok(Arc::new(RedisBroker::connect(endpoint).await?))
        }
        "memory" => Ok(Arc::new(MemoryBroker::new())),
        other => Err(BridgeError::ConfigInvalid(format!(
            "unsupported broker driver: {other}"
        ))),
    }
}

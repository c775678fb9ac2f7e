//! Redis pub/sub adapter.
//!
//! Keeps one managed publisher connection for the lifetime of the broker.
//! A publish that hits a dropped connection fails and schedules a
//! reconnect, so later publishes go through once the server is back. Every
//! subscription owns its own pub/sub connection; the first one is opened
//! eagerly at construction so that a bad address or bad credentials fail
//! fast.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, PubSub};
use tracing::{debug, info};
use url::Url;
use wsbridge_core::{BridgeError, BrokerPort, Subscription};
use wsbridge_settings::BrokerEndpointSettings;

/// Connection parameters for [`RedisBroker`].
#[derive(Clone, Debug, PartialEq)]
pub struct RedisEndpoint {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// ACL username, used only together with `password`.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Prepended to every channel name.
    pub prefix: String,
    /// Bound on each publish. `None` keeps the client default.
    pub publish_timeout: Option<Duration>,
}

impl From<&BrokerEndpointSettings> for RedisEndpoint {
    fn from(settings: &BrokerEndpointSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            username: non_empty(settings.options.username.as_deref()),
            password: non_empty(settings.options.password.as_deref()),
            prefix: settings.options.prefix.clone().unwrap_or_default(),
            publish_timeout: settings.options.publish_timeout(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

impl RedisEndpoint {
    /// `redis://` URL carrying the credentials.
    ///
    /// `username:password` when both are set, `:password` when only the
    /// password is set, no userinfo otherwise.
    pub fn connection_url(&self) -> Result<Url, BridgeError> {
        let mut url = Url::parse(&format!("redis://{}:{}", self.host, self.port))
            .map_err(|e| BridgeError::ConfigInvalid(format!("invalid redis address: {e}")))?;
        if let Some(password) = &self.password {
            let username = self.username.as_deref().unwrap_or("");
            url.set_username(username)
                .and_then(|()| url.set_password(Some(password)))
                .map_err(|()| BridgeError::ConfigInvalid("redis address cannot carry credentials".into()))?;
        }
        Ok(url)
    }

    /// Channel name as seen by the server.
    pub fn prefixed(&self, channel: &str) -> String {
        format!("{}{channel}", self.prefix)
    }

    /// Channel name as seen by the application.
    pub fn unprefixed<'a>(&self, channel: &'a str) -> &'a str {
        channel.strip_prefix(self.prefix.as_str()).unwrap_or(channel)
    }
}

/// A raw broker handle, see [`RedisBroker::connection`].
pub enum RedisHandle {
    /// Command connection shared with the broker's publisher. Reconnects on
    /// its own after the server drops it.
    Publisher(ConnectionManager),
    /// Connection dedicated to pub/sub; it never times out on reads.
    Subscriber(PubSub),
}

/// Broker backed by a Redis-compatible server.
pub struct RedisBroker {
    endpoint: RedisEndpoint,
    client: redis::Client,
    publisher: ConnectionManager,
    spare_subscriber: Mutex<Option<PubSub>>,
}

impl RedisBroker {
    /// Connect the publisher and a first subscriber.
    ///
    /// Fails with [`BridgeError::BrokerUnavailable`] if either connection or
    /// authentication fails.
    pub async fn connect(endpoint: RedisEndpoint) -> Result<Self, BridgeError> {
        let url = endpoint.connection_url()?;
        let client = redis::Client::open(url.as_str()).map_err(to_bridge_error)?;
        // The pub/sub connect does not retry, so it goes first
        let subscriber = client.get_async_pubsub().await.map_err(to_bridge_error)?;
        let publisher = client
            .get_connection_manager()
            .await
            .map_err(to_bridge_error)?;

        info!(host = %endpoint.host, port = endpoint.port, prefix = %endpoint.prefix, "connected to redis");
        Ok(Self {
            endpoint,
            client,
            publisher,
            spare_subscriber: Mutex::new(Some(subscriber)),
        })
    }

    /// A raw handle of the requested kind.
    ///
    /// Subscriber handles are fresh connections. Publisher handles share the
    /// broker's managed connection.
    pub async fn connection(&self, for_subscribe: bool) -> Result<RedisHandle, BridgeError> {
        if for_subscribe {
            let pubsub = self.client.get_async_pubsub().await.map_err(to_bridge_error)?;
            Ok(RedisHandle::Subscriber(pubsub))
        } else {
            Ok(RedisHandle::Publisher(self.publisher.clone()))
        }
    }

    /// Connection parameters.
    pub fn endpoint(&self) -> &RedisEndpoint {
        &self.endpoint
    }

    async fn subscriber(&self) -> Result<PubSub, BridgeError> {
        let spare = self.spare_subscriber.lock().take();
        if let Some(pubsub) = spare {
            return Ok(pubsub);
        }
        match self.connection(true).await? {
            RedisHandle::Subscriber(pubsub) => Ok(pubsub),
            RedisHandle::Publisher(_) => Err(BridgeError::broker("expected a subscriber handle")),
        }
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("host", &self.endpoint.host)
            .field("port", &self.endpoint.port)
            .field("prefix", &self.endpoint.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerPort for RedisBroker {
    fn driver(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BridgeError> {
        let key = self.endpoint.prefixed(channel);
        let mut conn = self.publisher.clone();
        let publish = async move {
            let _receivers: i64 = conn.publish(key, message).await.map_err(to_bridge_error)?;
            Ok::<(), BridgeError>(())
        };
        match self.endpoint.publish_timeout {
            Some(limit) => tokio::time::timeout(limit, publish)
                .await
                .map_err(|_| BridgeError::broker(format!("publish to {channel} timed out")))?,
            None => publish.await,
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BridgeError> {
        let key = self.endpoint.prefixed(channel);
        let mut pubsub = self.subscriber().await?;
        pubsub.subscribe(&key).await.map_err(to_bridge_error)?;
        debug!(channel = %self.endpoint.unprefixed(&key), "redis subscription opened");

        let stream = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>().map_err(to_bridge_error)
        });
        Ok(Subscription::new(channel, stream))
    }
}

fn to_bridge_error(err: redis::RedisError) -> BridgeError {
    BridgeError::broker(err.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

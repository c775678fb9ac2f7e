//! Broker port: the pub/sub capability the relays consume.
//!
//! Publishing goes through a long-lived publisher handle owned by the
//! adapter. Every [`BrokerPort::subscribe`] call owns a dedicated subscriber
//! connection, since a subscribed connection cannot issue other commands.
//! Dropping the returned [`Subscription`] releases that connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::errors::{BridgeError, Result};

/// A live subscription to one broker channel.
///
/// Yields payloads in broker delivery order. End of stream means the
/// subscriber connection went away.
pub struct Subscription {
    channel: String,
    inner: BoxStream<'static, Result<String>>,
}

impl Subscription {
    /// Wrap a payload stream for `channel`.
    pub fn new<S>(channel: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            channel: channel.into(),
            inner: stream.boxed(),
        }
    }

    /// Logical (unprefixed) channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Stream for Subscription {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Pub/sub broker capability.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Driver name, for logging.
    fn driver(&self) -> &'static str;

    /// Publish a UTF-8 payload on `channel`.
    ///
    /// Fails with [`BridgeError::BrokerUnavailable`] when the publisher is gone.
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Open a dedicated subscriber connection listening on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Blocking callback form of [`subscribe`](Self::subscribe).
    ///
    /// Invokes `callback(channel, message)` for every delivery. Returns only
    /// when the subscription fails, with the error that ended it.
    async fn listen(
        &self,
        channel: &str,
        callback: &mut (dyn for<'c> FnMut(&'c str, String) + Send),
    ) -> BridgeError {
        let mut subscription = match self.subscribe(channel).await {
            Ok(subscription) => subscription,
            Err(e) => return e,
        };
        while let Some(item) = subscription.next().await {
            match item {
                Ok(message) => callback(subscription.channel(), message),
                Err(e) => return e,
            }
        }
        BridgeError::broker(format!("subscription to {channel} ended"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// Broker that replays a fixed script on every subscription.
    struct Scripted {
        script: Vec<Result<String>>,
    }

    #[async_trait]
    impl BrokerPort for Scripted {
        fn driver(&self) -> &'static str {
            "scripted"
        }

        async fn publish(&self, _channel: &str, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription> {
            if channel == "refused" {
                return Err(BridgeError::broker("NOAUTH"));
            }
            Ok(Subscription::new(
                channel,
                futures::stream::iter(self.script.clone()),
            ))
        }
    }

    #[tokio::test]
    async fn subscription_yields_in_order() {
        let broker = Scripted {
            script: vec![Ok("a".into()), Ok("b".into())],
        };
        let sub = broker.subscribe("chan").await.unwrap();
        assert_eq!(sub.channel(), "chan");
        let items: Vec<_> = sub.collect().await;
        assert_eq!(items, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn listen_delivers_then_returns_end_of_stream_error() {
        let broker = Scripted {
            script: vec![Ok("one".into()), Ok("two".into())],
        };
        let mut seen = Vec::new();
        let err = broker
            .listen("chan", &mut |channel, message| {
                seen.push(format!("{channel}={message}"));
            })
            .await;
        assert_eq!(seen, vec!["chan=one", "chan=two"]);
        assert_matches!(err, BridgeError::BrokerUnavailable { .. });
    }

    #[tokio::test]
    async fn listen_returns_stream_error() {
        let broker = Scripted {
            script: vec![
                Ok("one".into()),
                Err(BridgeError::broker("connection reset")),
                Ok("never".into()),
            ],
        };
        let mut count = 0;
        let err = broker
            .listen("chan", &mut |_, _| {
                count += 1;
            })
            .await;
        assert_eq!(count, 1);
        assert_eq!(err.failure(), "connection reset");
    }

    #[tokio::test]
    async fn listen_returns_subscribe_error() {
        let broker = Scripted { script: Vec::new() };
        let err = broker.listen("refused", &mut |_, _| {}).await;
        assert_eq!(err.failure(), "NOAUTH");
    }
}

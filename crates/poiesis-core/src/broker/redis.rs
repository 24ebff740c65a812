//! Redis pub/sub adaptor for the broker port.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tracing::debug;

use crate::broker::{Message, MessageBroker, Subscription};
use crate::config::BrokerConfig;
use crate::error::CoreError;

/// Broker adaptor backed by Redis pub/sub.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, CoreError> {
        let url = match &config.password {
            Some(password) => format!("redis://:{}@{}:{}", password, config.host, config.port),
            None => format!("redis://{}:{}", config.host, config.port),
        };
        let client = redis::Client::open(url).map_err(broker_err)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn publish(&self, channel: &str, message: &Message) -> Result<(), CoreError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| CoreError::Broker(format!("message serialization failed: {e}")))?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(broker_err)?;
        debug!(channel, status = ?message.status, "publishing stage message");
        let _: i64 = conn.publish(channel, payload).await.map_err(broker_err)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CoreError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(broker_err)?;
        pubsub.subscribe(channel).await.map_err(broker_err)?;
        let stream = pubsub.into_on_message().map(|msg| {
            let payload: String = msg.get_payload().map_err(broker_err)?;
            serde_json::from_str(&payload)
                .map_err(|e| CoreError::Broker(format!("malformed broker message: {e}")))
        });
        Ok(Subscription::new(stream.boxed()))
    }
}

fn broker_err(e: redis::RedisError) -> CoreError {
    CoreError::Broker(e.to_string())
}

//! In-memory broker: per-channel broadcast fan-out.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use poiesis_core::CoreError;
use poiesis_core::broker::{Message, MessageBroker, Subscription};

const CHANNEL_CAPACITY: usize = 64;

/// Broker fake backed by tokio broadcast channels.
#[derive(Default)]
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<Message>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Message> {
        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, channel: &str, message: &Message) -> Result<(), CoreError> {
        // A publish with no subscribers is dropped, like real pub/sub.
        let _ = self.sender(channel).send(message.clone());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CoreError> {
        let receiver = self.sender(channel).subscribe();
        let stream = BroadcastStream::new(receiver)
            .map(|result| result.map_err(|e| CoreError::Broker(e.to_string())));
        Ok(Subscription::new(stream.boxed()))
    }
}

//! The pub/sub port coupling the pipeline stages.
//!
//! Each task owns one channel, named by its UUID. A stage publishes
//! exactly one terminal message on it; Torc consumes exactly one message
//! per stage. Delivery is at-least-once within a session; a broker
//! disconnect mid-wait is treated as an error by the consumer.

pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Outcome carried by a stage's terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Success,
    Error,
}

/// A message on a task channel.
///
/// Wire format is JSON: `{"message", "status", "timestamp"}` with an
/// ISO-8601 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            status: MessageStatus::Success,
            timestamp: Utc::now(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            status: MessageStatus::Error,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == MessageStatus::Error
    }
}

/// An open single-consumer subscription on one channel.
pub struct Subscription {
    stream: BoxStream<'static, Result<Message, CoreError>>,
}

impl Subscription {
    pub fn new(stream: BoxStream<'static, Result<Message, CoreError>>) -> Self {
        Self { stream }
    }

    /// Wait for the next message. A stream that ends before yielding one
    /// means the broker dropped the subscription mid-wait, which callers
    /// treat as an error.
    pub async fn next_message(&mut self) -> Result<Message, CoreError> {
        match self.stream.next().await {
            Some(result) => result,
            None => Err(CoreError::Broker(
                "subscription closed before a message arrived".to_owned(),
            )),
        }
    }
}

/// Publish/subscribe on per-task channels.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, channel: &str, message: &Message) -> Result<(), CoreError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CoreError>;
}

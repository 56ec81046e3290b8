//! Publish side of Murmur.
//!
//! A [`MessageBus`] accepts one message and resolves, asynchronously, to the
//! broker's message id or an error; retries live inside the bus. The
//! [`FanOutPublisher`] sits on top of any bus and turns a batch of fetched
//! items into N concurrent publishes with a single aggregate outcome.
//!
//! Implementations:
//! - [`pubsub::PubSubTopic`]: Google Cloud Pub/Sub REST `topics.publish`
//! - [`log_bus::LoggingBus`]: logs and acknowledges, for dry runs
//!
//! ```no_run
//! use murmur_bus::{FanOutPublisher, log_bus::LoggingBus};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo(items: Vec<murmur_common::Item>) -> Result<(), murmur_bus::PublishError> {
//! let publisher = FanOutPublisher::new(Arc::new(LoggingBus::new("dry-run")));
//! let result = publisher.publish_all(&items, &CancellationToken::new()).await?;
//! assert_eq!(result.failed, 0);
//! # Ok(()) }
//! ```
use async_trait::async_trait;
use bytes::Bytes;
use murmur_http::HttpError;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod fanout;
pub mod log_bus;
pub mod pubsub;
pub mod token;

pub use fanout::{BatchResult, FanOutPublisher, PublishError, PublishFailure};

/// Broker-assigned id of an accepted message.
pub type MessageId = String;

/// One message as handed to the bus: an opaque payload plus optional
/// string attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub data: Bytes,
    pub attributes: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Payload is the raw UTF-8 bytes of `text`, no envelope.
    pub fn text(text: &str) -> Self {
        Self {
            data: Bytes::copy_from_slice(text.as_bytes()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Failure of a single publish, after the bus gave up retrying.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish request failed: {0}")]
    Http(#[from] HttpError),
    #[error("publish acknowledged without a message id")]
    MissingAck,
    #[error("access token unavailable: {0}")]
    Token(String),
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Submit one message and wait for the broker's confirmation.
    async fn publish(&self, message: OutboundMessage) -> Result<MessageId, BusError>;

    /// Human-readable destination, for logs.
    fn destination(&self) -> &str;
}

//! A bus that only logs, used by `--dry-run`.
use crate::{BusError, MessageBus, MessageId, OutboundMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct LoggingBus {
    destination: String,
    sent: AtomicU64,
}

impl LoggingBus {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            sent: AtomicU64::new(0),
        }
    }

    /// Messages acknowledged so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageBus for LoggingBus {
    async fn publish(&self, message: OutboundMessage) -> Result<MessageId, BusError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            destination = %self.destination,
            seq = n,
            attributes = ?message.attributes,
            payload = %String::from_utf8_lossy(&message.data),
            "dry_run.publish"
        );
        Ok(format!("dry-run-{n}"))
    }

    fn destination(&self) -> &str {
        &self.destination
    }
}

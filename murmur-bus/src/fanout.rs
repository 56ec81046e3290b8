//! Concurrent fan-out of a fetched batch onto a [`MessageBus`].
//!
//! Every item becomes its own task; a semaphore caps how many of them are
//! waiting on the bus at once. The call returns only after every task has
//! resolved, or as soon as the caller's cancellation token fires.
//!
//! Outcome rules:
//! - an empty batch succeeds immediately and never touches the bus
//! - one failed item never stops the others from being published
//! - any failure turns the whole batch into [`PublishError::Partial`]; what
//!   was already delivered stays delivered
use crate::{BusError, MessageBus, OutboundMessage};
use murmur_common::Item;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Aggregate over one batch. `failed <= total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub failed: usize,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

/// Which item failed and why.
#[derive(Debug)]
pub struct PublishFailure {
    pub item_id: String,
    pub cause: BusError,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{} / {} messages failed to publish", .result.failed, .result.total)]
    Partial {
        result: BatchResult,
        failures: Vec<PublishFailure>,
    },
    #[error("publish cancelled after {completed} of {total} messages resolved")]
    Cancelled { completed: usize, total: usize },
}

impl PublishError {
    /// Counts known at the time the error was raised.
    pub fn result(&self) -> Option<BatchResult> {
        match self {
            PublishError::Partial { result, .. } => Some(*result),
            PublishError::Cancelled { .. } => None,
        }
    }
}

pub struct FanOutPublisher {
    bus: Arc<dyn MessageBus>,
    max_in_flight: usize,
    attach_id: bool,
}

impl FanOutPublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            attach_id: false,
        }
    }

    /// Cap concurrent publishes; values below one are raised to one.
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    /// Attach the item id as message attribute `id`.
    pub fn with_id_attribute(mut self, enabled: bool) -> Self {
        self.attach_id = enabled;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    fn message_for(&self, item: &Item) -> OutboundMessage {
        let message = OutboundMessage::text(&item.text);
        if self.attach_id {
            message.with_attribute("id", item.id.clone())
        } else {
            message
        }
    }

    /// Publish every item and report a single outcome.
    ///
    /// Returns `Ok` only when all `items.len()` publishes were confirmed.
    pub async fn publish_all(
        &self,
        items: &[Item],
        cancel: &CancellationToken,
    ) -> Result<BatchResult, PublishError> {
        let total = items.len();
        if total == 0 {
            tracing::debug!(destination = self.bus.destination(), "fanout.empty");
            return Ok(BatchResult::default());
        }
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled {
                completed: 0,
                total,
            });
        }

        let failed = Arc::new(AtomicUsize::new(0));
        let slots = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for item in items {
            let bus = Arc::clone(&self.bus);
            let failed = Arc::clone(&failed);
            let slots = Arc::clone(&slots);
            let message = self.message_for(item);
            let item_id = item.id.clone();

            tasks.spawn(async move {
                let outcome = match slots.acquire_owned().await {
                    Ok(_permit) => bus.publish(message).await,
                    Err(_) => Err(BusError::Rejected("publish slots closed".into())),
                };
                match outcome {
                    Ok(message_id) => {
                        tracing::trace!(%item_id, %message_id, "fanout.item_published");
                        Ok(())
                    }
                    Err(cause) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        Err(PublishFailure { item_id, cause })
                    }
                }
            });
        }

        let mut failures = Vec::new();
        let mut completed = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::warn!(
                        destination = self.bus.destination(),
                        completed,
                        total,
                        "fanout.cancelled"
                    );
                    return Err(PublishError::Cancelled { completed, total });
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    completed += 1;
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(failure)) => {
                            tracing::warn!(
                                item_id = %failure.item_id,
                                error = %failure.cause,
                                "fanout.item_failed"
                            );
                            failures.push(failure);
                        }
                        Err(join_err) => {
                            // The task died before it could report; count it all the same.
                            failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(error = %join_err, "fanout.task_lost");
                            failures.push(PublishFailure {
                                item_id: "<unknown>".to_string(),
                                cause: BusError::Rejected(format!("publish task lost: {join_err}")),
                            });
                        }
                    }
                }
            }
        }

        let result = BatchResult {
            total,
            failed: failed.load(Ordering::Relaxed),
        };
        tracing::info!(
            destination = self.bus.destination(),
            total = result.total,
            failed = result.failed,
            "fanout.done"
        );

        if result.failed == 0 {
            Ok(result)
        } else {
            Err(PublishError::Partial { result, failures })
        }
    }
}

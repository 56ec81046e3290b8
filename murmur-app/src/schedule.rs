//! Built-in timer for `murmur schedule`.
use crate::crawl::{CrawlError, Crawler};
use murmur_bus::BatchResult;
use murmur_runtime::MurmurHandle;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

/// Log the outcome of one invocation.
pub fn report(outcome: &Result<BatchResult, CrawlError>) {
    match outcome {
        Ok(result) => tracing::info!(total = result.total, "crawl.done"),
        Err(CrawlError::Publish(e)) => {
            let result = e.result().unwrap_or_default();
            tracing::error!(
                error = %e,
                total = result.total,
                failed = result.failed,
                "crawl.failed"
            );
        }
        Err(e) => tracing::error!(error = %e, "crawl.failed"),
    }
}

/// One invocation per `every`, each cancelled after `deadline`, until the
/// root token fires. A slow invocation makes the next tick skip rather than
/// burst.
pub async fn run_schedule(
    crawler: Arc<Crawler>,
    handle: MurmurHandle,
    every: Duration,
    deadline: Duration,
) -> u64 {
    let root = handle.cancellation();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut invocations = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = root.cancelled() => break,
            _ = ticker.tick() => {}
        }

        invocations += 1;
        let cancel = handle.deadline(deadline);
        let outcome = crawler.run_once(OffsetDateTime::now_utc(), &cancel).await;
        // Also stops this invocation's deadline timer.
        cancel.cancel();
        report(&outcome);
    }

    tracing::info!(invocations, "schedule.stopped");
    invocations
}

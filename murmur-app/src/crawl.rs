//! One invocation: derive the window, fetch it, fan the posts out.
use murmur_bus::{BatchResult, BusError, FanOutPublisher, PublishError};
use murmur_common::TimeWindow;
use murmur_social::{FetchError, WindowFetcher};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("creating pub/sub client for project {project} failed: {source}")]
    Client {
        project: String,
        #[source]
        source: BusError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("search window ending {lag} before now and spanning {width} is out of range")]
    Window { lag: Duration, width: Duration },
    #[error("invocation cancelled before the search completed")]
    Cancelled,
}

pub struct Crawler {
    fetcher: Arc<dyn WindowFetcher>,
    publisher: FanOutPublisher,
    query: String,
    limit: u32,
    lag: Duration,
    width: Duration,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn WindowFetcher>, publisher: FanOutPublisher) -> Self {
        Self {
            fetcher,
            publisher,
            query: "corona".to_string(),
            limit: 10,
            lag: Duration::minutes(1),
            width: Duration::minutes(1),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>, limit: u32) -> Self {
        self.query = query.into();
        self.limit = limit;
        self
    }

    /// Window ends `lag` before the invocation time and spans `width`.
    pub fn with_window(mut self, lag: Duration, width: Duration) -> Self {
        self.lag = lag;
        self.width = width;
        self
    }

    /// Fetch the window trailing `now` and publish every result.
    ///
    /// A failed fetch publishes nothing. Publish failures are reported in
    /// aggregate after every item has been attempted.
    pub async fn run_once(
        &self,
        now: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, CrawlError> {
        let window = TimeWindow::trailing(now, self.lag, self.width).ok_or(CrawlError::Window {
            lag: self.lag,
            width: self.width,
        })?;
        tracing::info!(
            query = %self.query,
            start = %window.start(),
            end = %window.end(),
            limit = self.limit,
            "crawl.window"
        );

        let items = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            fetched = self.fetcher.fetch(&self.query, &window, self.limit) => fetched?,
        };
        tracing::info!(count = items.len(), "crawl.fetched");

        Ok(self.publisher.publish_all(&items, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_bus::{MessageBus, MessageId, OutboundMessage};
    use murmur_common::Item;
    use std::sync::Mutex;
    use time::macros::datetime;

    struct FixedFetcher {
        outcome: Mutex<Option<Result<Vec<Item>, FetchError>>>,
        windows: Mutex<Vec<(String, TimeWindow, u32)>>,
        hang: bool,
    }

    impl FixedFetcher {
        fn returning(outcome: Result<Vec<Item>, FetchError>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                windows: Mutex::new(Vec::new()),
                hang: false,
            }
        }
    }

    #[async_trait]
    impl WindowFetcher for FixedFetcher {
        async fn fetch(
            &self,
            query: &str,
            window: &TimeWindow,
            limit: u32,
        ) -> Result<Vec<Item>, FetchError> {
            self.windows
                .lock()
                .unwrap()
                .push((query.to_string(), *window, limit));
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.outcome.lock().unwrap().take().unwrap_or(Ok(Vec::new()))
        }
    }

    /// Records payloads; fails the ones listed.
    #[derive(Default)]
    struct RecordingBus {
        fail: Vec<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, message: OutboundMessage) -> Result<MessageId, BusError> {
            let payload = String::from_utf8(message.data.to_vec()).unwrap();
            self.sent.lock().unwrap().push(payload.clone());
            if self.fail.contains(&payload) {
                Err(BusError::Rejected(format!("refused {payload}")))
            } else {
                Ok(format!("id-{payload}"))
            }
        }

        fn destination(&self) -> &str {
            "recording"
        }
    }

    fn abc() -> Vec<Item> {
        let at = datetime!(2024-05-01 11:58:10 UTC);
        vec![Item::new("1", at, "a"), Item::new("2", at, "b"), Item::new("3", at, "c")]
    }

    fn crawler(fetcher: Arc<FixedFetcher>, bus: Arc<RecordingBus>) -> Crawler {
        Crawler::new(fetcher, FanOutPublisher::new(bus))
    }

    #[tokio::test]
    async fn fetches_trailing_window_and_publishes_everything() {
        let fetcher = Arc::new(FixedFetcher::returning(Ok(abc())));
        let bus = Arc::new(RecordingBus::default());

        let result = crawler(fetcher.clone(), bus.clone())
            .run_once(datetime!(2024-05-01 12:00:30.5 UTC), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, BatchResult { total: 3, failed: 0 });
        let (query, window, limit) = fetcher.windows.lock().unwrap()[0].clone();
        assert_eq!(query, "corona");
        assert_eq!(limit, 10);
        assert_eq!(window.start(), datetime!(2024-05-01 11:58:30 UTC));
        assert_eq!(window.end(), datetime!(2024-05-01 11:59:30 UTC));

        let mut sent = bus.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn one_rejected_post_fails_the_invocation() {
        let fetcher = Arc::new(FixedFetcher::returning(Ok(abc())));
        let bus = Arc::new(RecordingBus {
            fail: vec!["b".to_string()],
            ..Default::default()
        });

        let err = crawler(fetcher, bus.clone())
            .run_once(OffsetDateTime::now_utc(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "1 / 3 messages failed to publish");
        let sent = bus.sent.lock().unwrap();
        assert!(sent.contains(&"a".to_string()) && sent.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn fetch_failure_publishes_nothing() {
        let fetcher = Arc::new(FixedFetcher::returning(Err(FetchError::Malformed {
            id: "9".into(),
            reason: "missing created_at".into(),
        })));
        let bus = Arc::new(RecordingBus::default());

        let err = crawler(fetcher, bus.clone())
            .run_once(OffsetDateTime::now_utc(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CrawlError::Fetch(_)), "got {err:?}");
        assert!(bus.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_window_is_a_success() {
        let fetcher = Arc::new(FixedFetcher::returning(Ok(Vec::new())));
        let bus = Arc::new(RecordingBus::default());

        let result = crawler(fetcher, bus)
            .run_once(OffsetDateTime::now_utc(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, BatchResult::default());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stuck_fetch() {
        let fetcher = Arc::new(FixedFetcher {
            hang: true,
            ..FixedFetcher::returning(Ok(abc()))
        });
        let bus = Arc::new(RecordingBus::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            crawler(fetcher, bus.clone()).run_once(OffsetDateTime::now_utc(), &cancel),
        )
        .await
        .expect("run_once must return after cancellation");

        assert!(matches!(outcome, Err(CrawlError::Cancelled)));
        assert!(bus.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrepresentable_window_fails_without_fetching() {
        let fetcher = Arc::new(FixedFetcher::returning(Ok(abc())));
        let bus = Arc::new(RecordingBus::default());

        let err = crawler(fetcher.clone(), bus.clone())
            .with_window(Duration::seconds(100_000_000_000_000), Duration::minutes(1))
            .run_once(OffsetDateTime::now_utc(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CrawlError::Window { .. }), "got {err:?}");
        assert!(fetcher.windows.lock().unwrap().is_empty());
        assert!(bus.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_query_and_window_are_used() {
        let fetcher = Arc::new(FixedFetcher::returning(Ok(Vec::new())));
        crawler(fetcher.clone(), Arc::new(RecordingBus::default()))
            .with_query("covid", 50)
            .with_window(Duration::seconds(30), Duration::minutes(5))
            .run_once(datetime!(2024-05-01 12:00:00 UTC), &CancellationToken::new())
            .await
            .unwrap();

        let (query, window, limit) = fetcher.windows.lock().unwrap()[0].clone();
        assert_eq!((query.as_str(), limit), ("covid", 50));
        assert_eq!(window.start(), datetime!(2024-05-01 11:54:30 UTC));
        assert_eq!(window.end(), datetime!(2024-05-01 11:59:30 UTC));
    }
}

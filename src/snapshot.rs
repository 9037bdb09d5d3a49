//! Rate-limited REST snapshot acquisition
//!
//! A counting semaphore bounds in-flight requests per exchange so a resync
//! storm cannot flatten the REST endpoint, and a fixed delay after every
//! attempt keeps the request rate inside venue limits. Failed fetches retry
//! until they succeed; the policy is deliberately minimal (no backoff, no
//! circuit breaker) and a fetch only gives up when the fetcher shuts down.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::adapter::SnapshotEndpoint;
use crate::error::{FeedError, Result};
use crate::events::{EventSink, FeedEvent};
use crate::types::{Market, Snapshot};

/// One attempt at reading a snapshot for a market.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, market: &Market) -> Result<Snapshot>;
}

/// Production source: HTTP GET against the adapter's snapshot endpoint.
pub struct RestSnapshotSource {
    http: reqwest::Client,
    endpoint: Arc<dyn SnapshotEndpoint>,
}

impl RestSnapshotSource {
    pub fn new(endpoint: Arc<dyn SnapshotEndpoint>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch(&self, market: &Market) -> Result<Snapshot> {
        let url = self.endpoint.snapshot_url(market);
        debug!(market = %market, url = %url, "Fetching order book snapshot");
        let response = self.http.get(&url).send().await?;
        let body = response.bytes().await?;
        self.endpoint.decode_snapshot(market, &body)
    }
}

/// Concurrency-capped, rate-limited, infinitely-retrying snapshot fetches.
pub struct SnapshotFetcher {
    source: Arc<dyn SnapshotSource>,
    semaphore: Arc<Semaphore>,
    request_delay: Duration,
    events: EventSink,
}

impl SnapshotFetcher {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        concurrency: usize,
        request_delay: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            source,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            request_delay,
            events,
        }
    }

    /// Fetch a snapshot, retrying until it succeeds.
    ///
    /// The post-request delay runs while the permit is still held so the
    /// spacing applies per concurrency slot. Failures are emitted as error
    /// events and retried; `Err` only means the fetcher was closed.
    pub async fn fetch(&self, market: &Market) -> Result<Snapshot> {
        loop {
            let permit = match self.semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(FeedError::Shutdown),
            };
            let attempt = self.source.fetch(market).await;
            tokio::time::sleep(self.request_delay).await;
            drop(permit);

            match attempt {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    warn!(market = %market, error = %e, "Snapshot fetch failed, retrying");
                    let _ = self.events.send(FeedEvent::Error {
                        message: format!("snapshot fetch: {e}"),
                        market: Some(market.clone()),
                    });
                }
            }
        }
    }

    /// Abort pending and future fetches; they resolve to `FeedError::Shutdown`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl SnapshotSource for FlakySource {
        async fn fetch(&self, market: &Market) -> Result<Snapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(FeedError::SnapshotFetch("boom".to_string()))
            } else {
                Ok(Snapshot {
                    market: market.clone(),
                    timestamp_ms: Some(1),
                    sequence_id: Some(n as u64),
                    asks: vec![],
                    bids: vec![],
                    checksum: None,
                })
            }
        }
    }

    fn market() -> Market {
        Market::new("binance", "BTC", "USDT", "BTCUSDT")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            failures: 3,
        });
        let (tx, mut rx) = events::channel();
        let fetcher = SnapshotFetcher::new(source.clone(), 1, Duration::from_millis(50), tx);

        let snapshot = fetcher.fetch(&market()).await.unwrap();
        assert_eq!(snapshot.sequence_id, Some(3));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        // one error event per failed attempt
        let mut errors = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, FeedEvent::Error { .. }));
            errors += 1;
        }
        assert_eq!(errors, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_by_semaphore() {
        struct GaugeSource {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl SnapshotSource for GaugeSource {
            async fn fetch(&self, market: &Market) -> Result<Snapshot> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Snapshot {
                    market: market.clone(),
                    timestamp_ms: None,
                    sequence_id: None,
                    asks: vec![],
                    bids: vec![],
                    checksum: None,
                })
            }
        }

        let source = Arc::new(GaugeSource {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (tx, _rx) = events::channel();
        let fetcher = Arc::new(SnapshotFetcher::new(
            source.clone(),
            2,
            Duration::from_millis(5),
            tx,
        ));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let fetcher = fetcher.clone();
            tasks.push(tokio::spawn(async move { fetcher.fetch(&market()).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_aborts_fetch() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
        });
        let (tx, _rx) = events::channel();
        let fetcher = Arc::new(SnapshotFetcher::new(
            source,
            1,
            Duration::from_millis(10),
            tx,
        ));

        let pending = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.fetch(&market()).await })
        };
        tokio::time::sleep(Duration::from_millis(25)).await;
        fetcher.close();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(FeedError::Shutdown)));
    }
}

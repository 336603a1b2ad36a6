use dashmap::DashMap;
use hermes_core::{BookKey, ExchangeId, OrderBook};
use hermes_ports::{FetchError, SnapshotFetcher};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ratelimit::{EndpointClass, RateLimitError, RateLimiter};

/// A snapshot owed to `key`; `epoch` identifies the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub key: BookKey,
    pub epoch: u64,
    pub depth: u32,
}

/// Result of one fetch, routed back to the owning lane
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub key: BookKey,
    pub epoch: u64,
    pub result: Result<OrderBook, FetchError>,
}

struct SchedulerInner {
    queue: Mutex<VecDeque<SnapshotRequest>>,
    notify: Notify,
    fetchers: DashMap<ExchangeId, Arc<dyn SnapshotFetcher>>,
    limiter: RateLimiter,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// FIFO of REST snapshot fetches, one queued request per key
///
/// Fetches go through the public rate-limit class of their exchange and at
/// most `concurrency` run at once. Failures are reported, never retried.
#[derive(Clone)]
pub struct SnapshotScheduler {
    inner: Arc<SchedulerInner>,
}

impl SnapshotScheduler {
    pub fn new(limiter: RateLimiter, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                fetchers: DashMap::new(),
                limiter,
                permits: Arc::new(Semaphore::new(concurrency.max(1))),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn register(&self, exchange: ExchangeId, fetcher: Arc<dyn SnapshotFetcher>) {
        self.inner.fetchers.insert(exchange, fetcher);
    }

    pub fn unregister(&self, exchange: &ExchangeId) {
        self.inner.fetchers.remove(exchange);
        self.inner.queue.lock().retain(|r| &r.key.exchange != exchange);
    }

    /// Queue a fetch; a request already queued for the key takes the new epoch
    pub fn submit(&self, request: SnapshotRequest) {
        {
            let mut queue = self.inner.queue.lock();
            match queue.iter_mut().find(|r| r.key == request.key) {
                Some(queued) => *queued = request,
                None => queue.push_back(request),
            }
        }
        self.inner.notify.notify_one();
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Start the dispatch loop; outcomes are sent to `results`
    pub fn spawn(&self, results: mpsc::Sender<SnapshotOutcome>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(results).await })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.queue.lock().clear();
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>, results: mpsc::Sender<SnapshotOutcome>) {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(request) = next else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = self.notify.notified() => continue,
                }
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let inner = Arc::clone(&self);
            let results = results.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let key = request.key.clone();
                let epoch = request.epoch;
                let Some(result) = inner.fetch(request).await else {
                    return;
                };
                let outcome = SnapshotOutcome { key, epoch, result };
                if results.send(outcome).await.is_err() {
                    tracing::debug!("snapshot outcome receiver dropped");
                }
            });
        }
    }

    /// `None` if shut down before the fetch finished
    async fn fetch(&self, request: SnapshotRequest) -> Option<Result<OrderBook, FetchError>> {
        let exchange = &request.key.exchange;
        let Some(fetcher) = self.fetchers.get(exchange).map(|f| Arc::clone(f.value())) else {
            return Some(Err(FetchError::Unsupported {
                exchange: exchange.clone(),
                asset: request.key.asset,
            }));
        };

        let class = EndpointClass::public(exchange);
        match self.limiter.acquire(&class, 1, &self.shutdown).await {
            Ok(()) => {}
            Err(RateLimitError::Cancelled(_)) => return None,
            Err(e) => {
                tracing::warn!(key = %request.key, error = %e, "fetching snapshot without rate limit");
            }
        }

        tracing::debug!(key = %request.key, epoch = request.epoch, depth = request.depth, "fetching snapshot");
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = fetcher.fetch_snapshot(&request.key, request.depth) => Some(result),
        }
    }
}

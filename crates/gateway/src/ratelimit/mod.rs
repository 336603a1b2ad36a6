//! Token bucket rate limiting per endpoint class.
//!
//! Every outbound REST call and subscribe message passes through
//! [`RateLimiter::acquire`], which parks the caller until enough tokens have
//! refilled or the caller's cancellation token / deadline fires.

mod token_bucket;

use dashmap::DashMap;
use hermes_core::ExchangeId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{BucketConfig, RateLimitConfig};
use token_bucket::TokenBucket;

/// Kind of outbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Public,
    Private,
    Subscribe,
}

/// Bucket identity: one bucket per (exchange, kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointClass {
    pub exchange: ExchangeId,
    pub kind: EndpointKind,
}

impl EndpointClass {
    pub fn new(exchange: ExchangeId, kind: EndpointKind) -> Self {
        EndpointClass { exchange, kind }
    }

    pub fn public(exchange: &ExchangeId) -> Self {
        Self::new(exchange.clone(), EndpointKind::Public)
    }

    pub fn private(exchange: &ExchangeId) -> Self {
        Self::new(exchange.clone(), EndpointKind::Private)
    }

    pub fn subscribe(exchange: &ExchangeId) -> Self {
        Self::new(exchange.clone(), EndpointKind::Subscribe)
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EndpointKind::Public => "public",
            EndpointKind::Private => "private",
            EndpointKind::Subscribe => "subscribe",
        };
        write!(f, "{}/{}", self.exchange, kind)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit timeout on {class} after {waited:?}")]
    Timeout {
        class: EndpointClass,
        waited: Duration,
    },

    #[error("rate limit wait cancelled on {0}")]
    Cancelled(EndpointClass),

    #[error("requested {requested} tokens but {class} holds at most {capacity}")]
    ExceedsCapacity {
        class: EndpointClass,
        requested: u32,
        capacity: u32,
    },

    #[error("no bucket registered for {0}")]
    Unregistered(EndpointClass),
}

/// Shared token buckets, one per endpoint class
///
/// Cloning is cheap; clones share buckets.
#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<DashMap<EndpointClass, Mutex<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the bucket for a class; it starts full
    pub fn register(&self, class: EndpointClass, config: BucketConfig) {
        self.buckets.insert(
            class,
            Mutex::new(TokenBucket::new(config.capacity, config.refill_per_second)),
        );
    }

    /// Install all three buckets of an exchange
    pub fn register_exchange(&self, exchange: &ExchangeId, config: &RateLimitConfig) {
        self.register(EndpointClass::public(exchange), config.public);
        self.register(EndpointClass::private(exchange), config.private);
        self.register(EndpointClass::subscribe(exchange), config.subscribe);
    }

    /// Drop every bucket belonging to an exchange
    pub fn remove_exchange(&self, exchange: &ExchangeId) {
        self.buckets.retain(|class, _| &class.exchange != exchange);
    }

    /// Take `n` tokens without waiting; returns false if they are not there
    pub fn try_acquire(&self, class: &EndpointClass, n: u32) -> Result<bool, RateLimitError> {
        let (acquired, _) = self.poll(class, n)?;
        Ok(acquired)
    }

    /// Wait for `n` tokens until they arrive or `cancel` fires
    pub async fn acquire(
        &self,
        class: &EndpointClass,
        n: u32,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        self.acquire_inner(class, n, None, cancel).await
    }

    /// Like [`acquire`](Self::acquire), failing with `Timeout` at `deadline`
    pub async fn acquire_with_deadline(
        &self,
        class: &EndpointClass,
        n: u32,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        self.acquire_inner(class, n, Some(deadline), cancel).await
    }

    /// Tokens currently available, after refill
    pub fn available(&self, class: &EndpointClass) -> Option<f64> {
        let bucket = self.buckets.get(class)?;
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now());
        Some(bucket.tokens())
    }

    async fn acquire_inner(
        &self,
        class: &EndpointClass,
        n: u32,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled(class.clone()));
            }

            let (acquired, wait) = self.poll(class, n)?;
            if acquired {
                return Ok(());
            }

            let mut wake = Instant::now() + wait;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(RateLimitError::Timeout {
                        class: class.clone(),
                        waited: started.elapsed(),
                    });
                }
                wake = wake.min(deadline);
            }

            tracing::trace!(class = %class, tokens = n, ?wait, "waiting for rate limit tokens");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RateLimitError::Cancelled(class.clone()));
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn poll(&self, class: &EndpointClass, n: u32) -> Result<(bool, Duration), RateLimitError> {
        let bucket = self
            .buckets
            .get(class)
            .ok_or_else(|| RateLimitError::Unregistered(class.clone()))?;
        let mut bucket = bucket.lock();
        if n > bucket.capacity() {
            return Err(RateLimitError::ExceedsCapacity {
                class: class.clone(),
                requested: n,
                capacity: bucket.capacity(),
            });
        }
        Ok(bucket.try_consume(n, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, refill_per_second: f64) -> (RateLimiter, EndpointClass) {
        let limiter = RateLimiter::new();
        let class = EndpointClass::public(&ExchangeId::new("test"));
        limiter.register(
            class.clone(),
            BucketConfig {
                capacity,
                refill_per_second,
            },
        );
        (limiter, class)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_waits_for_refill() {
        let (limiter, class) = limiter(2, 1.0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&class, 2, &cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire(&class, 1, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fails_with_timeout() {
        let (limiter, class) = limiter(1, 0.5);
        let cancel = CancellationToken::new();
        limiter.acquire(&class, 1, &cancel).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(100);
        let err = limiter
            .acquire_with_deadline(&class, 1, deadline, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_waiter() {
        let (limiter, class) = limiter(1, 0.01);
        let cancel = CancellationToken::new();
        limiter.acquire(&class, 1, &cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let class = class.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&class, 1, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(RateLimitError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_request_above_capacity_is_rejected() {
        let (limiter, class) = limiter(3, 1.0);
        let err = limiter
            .acquire(&class, 4, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::ExceedsCapacity { requested: 4, .. }));
    }

    #[tokio::test]
    async fn test_per_exchange_isolation() {
        let limiter = RateLimiter::new();
        let a = ExchangeId::new("a");
        let b = ExchangeId::new("b");
        let config = RateLimitConfig {
            public: BucketConfig {
                capacity: 1,
                refill_per_second: 0.001,
            },
            ..Default::default()
        };
        limiter.register_exchange(&a, &config);
        limiter.register_exchange(&b, &config);

        assert!(limiter.try_acquire(&EndpointClass::public(&a), 1).unwrap());
        assert!(!limiter.try_acquire(&EndpointClass::public(&a), 1).unwrap());
        assert!(limiter.try_acquire(&EndpointClass::public(&b), 1).unwrap());
        assert!(limiter.try_acquire(&EndpointClass::subscribe(&a), 1).unwrap());
    }

    #[test]
    fn test_unregistered_class() {
        let limiter = RateLimiter::new();
        let class = EndpointClass::private(&ExchangeId::new("nowhere"));
        assert!(matches!(
            limiter.try_acquire(&class, 1),
            Err(RateLimitError::Unregistered(_))
        ));
    }
}

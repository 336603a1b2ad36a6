//! Last-write-wins stores for tickers and account holdings
//!
//! Owned by the service and torn down with it. Readers always get a clone,
//! so a concurrent write never shows up half-applied.

use dashmap::DashMap;
use hermes_core::{AccountHoldings, AssetType, BookKey, ExchangeId, Pair, Ticker};
use hermes_ports::{AccountFetcher, TickerFetcher};
use std::collections::HashSet;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::ratelimit::{EndpointClass, RateLimiter};

/// Concurrent map where every write replaces the previous value
pub struct KeyedCache<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Latest ticker per book
#[derive(Default)]
pub struct TickerCache {
    tickers: KeyedCache<BookKey, Ticker>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self, ticker: Ticker) {
        self.tickers.process(ticker.key.clone(), ticker);
    }

    pub fn get(&self, key: &BookKey) -> Option<Ticker> {
        self.tickers.get(key)
    }

    /// Store the tickers of `exchange`/`asset` whose pair is enabled
    ///
    /// Returns how many were stored; the rest are skipped.
    pub fn process_tickers(
        &self,
        exchange: &ExchangeId,
        asset: AssetType,
        tickers: impl IntoIterator<Item = Ticker>,
        enabled_pairs: &HashSet<Pair>,
    ) -> usize {
        let mut stored = 0;
        for ticker in tickers {
            let wanted = &ticker.key.exchange == exchange
                && ticker.key.asset == asset
                && enabled_pairs.contains(&ticker.key.pair);
            if wanted {
                self.process(ticker);
                stored += 1;
            }
        }
        stored
    }

    /// Cached ticker, or fetch, store and return it
    pub async fn fetch(
        &self,
        key: &BookKey,
        fetcher: &dyn TickerFetcher,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> Result<Ticker> {
        if let Some(ticker) = self.get(key) {
            return Ok(ticker);
        }
        limiter
            .acquire(&EndpointClass::public(&key.exchange), 1, cancel)
            .await?;
        let ticker = fetcher.fetch_ticker(key).await?;
        self.process(ticker.clone());
        Ok(ticker)
    }

    pub fn remove_exchange(&self, exchange: &ExchangeId) {
        self.tickers.retain(|key| &key.exchange != exchange);
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn clear(&self) {
        self.tickers.clear();
    }
}

/// Latest account holdings per exchange
#[derive(Default)]
pub struct AccountCache {
    accounts: KeyedCache<ExchangeId, AccountHoldings>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self, holdings: AccountHoldings) {
        self.accounts.process(holdings.exchange.clone(), holdings);
    }

    pub fn get(&self, exchange: &ExchangeId) -> Option<AccountHoldings> {
        self.accounts.get(exchange)
    }

    /// Cached holdings, or fetch them on the private class and store them
    pub async fn fetch(
        &self,
        exchange: &ExchangeId,
        fetcher: &dyn AccountFetcher,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> Result<AccountHoldings> {
        if let Some(holdings) = self.get(exchange) {
            return Ok(holdings);
        }
        limiter
            .acquire(&EndpointClass::private(exchange), 1, cancel)
            .await?;
        let holdings = fetcher.fetch_account(exchange).await?;
        self.process(holdings.clone());
        Ok(holdings)
    }

    pub fn remove(&self, exchange: &ExchangeId) {
        self.accounts.remove(exchange);
    }

    pub fn clear(&self) {
        self.accounts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BucketConfig, RateLimitConfig};
    use async_trait::async_trait;
    use chrono::Utc;
    use hermes_core::{Balance, Price, SubAccount};
    use hermes_ports::FetchError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ticker(base: &str, last: Price) -> Ticker {
        Ticker {
            key: BookKey::spot("test", Pair::new(base, "USDT")),
            last,
            high: last,
            low: last,
            bid: last,
            ask: last,
            volume: dec!(1),
            last_updated: Utc::now(),
        }
    }

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TickerFetcher for CountingFetcher {
        async fn fetch_ticker(&self, key: &BookKey) -> std::result::Result<Ticker, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.pair.base == "BAD" {
                return Err(FetchError::Parse("bad payload".into()));
            }
            Ok(ticker(&key.pair.base, dec!(42)))
        }
    }

    #[derive(Default)]
    struct CountingAccounts {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccountFetcher for CountingAccounts {
        async fn fetch_account(
            &self,
            exchange: &ExchangeId,
        ) -> std::result::Result<AccountHoldings, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccountHoldings::new(exchange.clone()).with_account(SubAccount {
                id: "main".into(),
                asset: AssetType::Spot,
                balances: vec![Balance::new("usdt", dec!(10), dec!(4))],
            }))
        }
    }

    #[test]
    fn test_last_write_wins() {
        let cache = TickerCache::new();
        cache.process(ticker("BTC", dec!(1)));
        cache.process(ticker("BTC", dec!(2)));

        let key = BookKey::spot("test", Pair::new("BTC", "USDT"));
        assert_eq!(cache.get(&key).unwrap().last, dec!(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_process_tickers_filters_disabled_pairs() {
        let cache = TickerCache::new();
        let enabled: HashSet<_> = [Pair::new("BTC", "USDT")].into_iter().collect();

        let stored = cache.process_tickers(
            &ExchangeId::new("test"),
            AssetType::Spot,
            vec![ticker("BTC", dec!(1)), ticker("ETH", dec!(2))],
            &enabled,
        );
        assert_eq!(stored, 1);
        assert!(
            cache
                .get(&BookKey::spot("test", Pair::new("ETH", "USDT")))
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_fetch_through_caches() {
        let cache = TickerCache::new();
        let fetcher = CountingFetcher::default();
        let limiter = RateLimiter::new();
        let exchange = ExchangeId::new("test");
        limiter.register_exchange(
            &exchange,
            &RateLimitConfig {
                public: BucketConfig {
                    capacity: 10,
                    refill_per_second: 10.0,
                },
                ..RateLimitConfig::default()
            },
        );
        let key = BookKey::spot(exchange, Pair::new("BTC", "USDT"));
        let cancel = CancellationToken::new();

        let first = cache.fetch(&key, &fetcher, &limiter, &cancel).await.unwrap();
        let second = cache.fetch(&key, &fetcher, &limiter, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let bad = BookKey::spot("test", Pair::new("BAD", "USDT"));
        assert!(cache.fetch(&bad, &fetcher, &limiter, &cancel).await.is_err());
        assert!(cache.get(&bad).is_none());
    }

    #[tokio::test]
    async fn test_account_fetch_through_uses_private_class() {
        let cache = AccountCache::new();
        let fetcher = CountingAccounts::default();
        let limiter = RateLimiter::new();
        let exchange = ExchangeId::new("test");
        limiter.register_exchange(
            &exchange,
            &RateLimitConfig {
                private: BucketConfig {
                    capacity: 1,
                    refill_per_second: 0.001,
                },
                ..RateLimitConfig::default()
            },
        );
        let cancel = CancellationToken::new();

        let first = cache.fetch(&exchange, &fetcher, &limiter, &cancel).await.unwrap();
        assert_eq!(first.available("USDT"), dec!(6));
        assert!(!limiter.try_acquire(&EndpointClass::private(&exchange), 1).unwrap());

        let second = cache.fetch(&exchange, &fetcher, &limiter, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_account_cache() {
        let cache = AccountCache::new();
        let exchange = ExchangeId::new("test");
        let holdings = AccountHoldings::new(exchange.clone()).with_account(SubAccount {
            id: "main".into(),
            asset: AssetType::Spot,
            balances: vec![Balance::new("btc", dec!(2), dec!(0.5))],
        });

        cache.process(holdings);
        let read = cache.get(&exchange).unwrap();
        assert_eq!(read.available("BTC"), dec!(1.5));

        cache.clear();
        assert!(cache.get(&exchange).is_none());
    }
}

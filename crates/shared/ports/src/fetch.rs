use async_trait::async_trait;
use hermes_core::{AccountHoldings, BookKey, ExchangeId, OrderBook, Ticker};

use crate::FetchError;

/// REST order book snapshot source
///
/// The returned book carries the exchange sequence the snapshot was taken at.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self, key: &BookKey, depth: u32) -> Result<OrderBook, FetchError>;
}

/// REST ticker source
#[async_trait]
pub trait TickerFetcher: Send + Sync {
    async fn fetch_ticker(&self, key: &BookKey) -> Result<Ticker, FetchError>;
}

/// Authenticated REST source of account holdings
#[async_trait]
pub trait AccountFetcher: Send + Sync {
    async fn fetch_account(&self, exchange: &ExchangeId) -> Result<AccountHoldings, FetchError>;
}

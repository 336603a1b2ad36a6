//! Exchange adapter bundle
//!
//! Everything exchange-specific the engine needs, handed over once in
//! [`MarketDataService::add_exchange`](crate::MarketDataService::add_exchange).
//! The engine never branches on exchange identity; per-venue wire formats
//! and REST calls live behind these traits.

use hermes_ports::{AccountFetcher, FrameCodec, SnapshotFetcher, TickerFetcher};
use std::sync::Arc;

use crate::transport::{Authenticator, Dialer};

#[derive(Clone)]
pub struct ExchangeAdapter {
    pub codec: Arc<dyn FrameCodec>,
    pub snapshots: Arc<dyn SnapshotFetcher>,
    pub tickers: Arc<dyn TickerFetcher>,
    pub dialer: Arc<dyn Dialer>,
    /// Run on every fresh socket before subscriptions are replayed
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Private REST endpoint for holdings; without it accounts only come
    /// from the socket
    pub accounts: Option<Arc<dyn AccountFetcher>>,
}

impl ExchangeAdapter {
    pub fn new(
        codec: Arc<dyn FrameCodec>,
        snapshots: Arc<dyn SnapshotFetcher>,
        tickers: Arc<dyn TickerFetcher>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            codec,
            snapshots,
            tickers,
            dialer,
            authenticator: None,
            accounts: None,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_account_fetcher(mut self, accounts: Arc<dyn AccountFetcher>) -> Self {
        self.accounts = Some(accounts);
        self
    }
}

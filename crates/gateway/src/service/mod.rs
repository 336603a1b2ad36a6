//! Service facade
//!
//! [`MarketDataService`] owns every shared component (rate limiter, book
//! store, caches, router, snapshot scheduler) and wires one connection,
//! subscription registry and set of background tasks per exchange.

mod exchange;

use dashmap::DashMap;
use hermes_core::{
    AccountHoldings, AssetType, BookKey, BookSnapshot, Channel, ConnectionState, ExchangeId,
    Frame, Pair, Subscription, SubscriptionSpec, Ticker, Trade,
};
use hermes_ports::Clock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::adapter::ExchangeAdapter;
use crate::cache::{AccountCache, TickerCache};
use crate::config::{ExchangeConfig, GlobalConfig};
use crate::connection::ConnectionHandle;
use crate::error::{GatewayError, Result};
use crate::events::{EventBus, StreamEvent};
use crate::orderbook::{BookStore, NotSynced, SnapshotScheduler, SyncSettings, SyncState};
use crate::ratelimit::RateLimiter;
use crate::router::{MessageRouter, RouterConfig, RouterTargets};
use crate::subscription::SubscriptionRegistry;
use crate::trades::TradeBuffer;
use exchange::{ExchangeRuntime, SessionReplay};

/// Shortest period of the ack-expiry / retry task
const MIN_MAINTENANCE_PERIOD: Duration = Duration::from_millis(50);

/// Multi-exchange market data engine
///
/// Must be created inside a tokio runtime; lanes and the snapshot pipeline
/// start immediately. An invalid [`GlobalConfig`] is rejected before anything
/// is spawned.
pub struct MarketDataService {
    global: GlobalConfig,
    limiter: RateLimiter,
    store: BookStore,
    events: EventBus,
    trades: Arc<TradeBuffer>,
    tickers: Arc<TickerCache>,
    accounts: Arc<AccountCache>,
    scheduler: SnapshotScheduler,
    router: Arc<MessageRouter>,
    exchanges: DashMap<ExchangeId, Arc<ExchangeRuntime>>,
    shutdown: CancellationToken,
}

impl MarketDataService {
    pub fn new(global: GlobalConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        global.validate()?;
        let limiter = RateLimiter::new();
        let store = BookStore::new();
        let events = EventBus::new(global.event_capacity);
        let trades = Arc::new(TradeBuffer::new(
            global.trade_history_limit,
            global.trade_pending_limit,
        ));
        let tickers = Arc::new(TickerCache::new());
        let accounts = Arc::new(AccountCache::new());
        let scheduler = SnapshotScheduler::new(limiter.clone(), global.snapshot_concurrency);
        tracing::info!(clock = clock.name(), lanes = global.lanes, "market data service starting");

        let router = Arc::new(MessageRouter::spawn(
            RouterConfig::from(&global),
            RouterTargets {
                store: store.clone(),
                clock,
                events: events.clone(),
                trades: Arc::clone(&trades),
                tickers: Arc::clone(&tickers),
                accounts: Arc::clone(&accounts),
                scheduler: scheduler.clone(),
            },
        ));

        Ok(MarketDataService {
            global,
            limiter,
            store,
            events,
            trades,
            tickers,
            accounts,
            scheduler,
            router,
            exchanges: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Register an exchange and connect to it
    ///
    /// Fails on invalid config, a duplicate id or an initial connect
    /// failure; on failure nothing stays registered.
    pub async fn add_exchange(&self, config: ExchangeConfig, adapter: ExchangeAdapter) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        config.validate()?;
        let exchange = config.id.clone();
        if self.exchanges.contains_key(&exchange) {
            return Err(GatewayError::DuplicateExchange(exchange));
        }

        self.limiter.register_exchange(&exchange, &config.rate_limits);
        self.scheduler
            .register(exchange.clone(), Arc::clone(&adapter.snapshots));

        let connection = ConnectionHandle::from_config(&config, self.global.inbound_capacity);
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&adapter.codec),
            connection.clone(),
            self.limiter.clone(),
            config.websocket.clone(),
            self.events.clone(),
        ));
        self.router.register(Arc::clone(&registry));

        let cancel = self.shutdown.child_token();
        let mut tasks = Vec::with_capacity(3);
        if let Some(inbound) = connection.take_inbound() {
            tasks.push(tokio::spawn(exchange::pump_inbound(
                exchange.clone(),
                inbound,
                Arc::clone(&adapter.codec),
                Arc::clone(&self.router),
                self.events.clone(),
                cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(exchange::watch_connection(
            exchange.clone(),
            connection.watch_state(),
            Arc::clone(&self.router),
            self.events.clone(),
            cancel.clone(),
        )));

        let runtime = Arc::new(ExchangeRuntime {
            connection: connection.clone(),
            registry: Arc::clone(&registry),
            tickers: Arc::clone(&adapter.tickers),
            accounts: adapter.accounts.clone(),
            cancel: cancel.clone(),
            tasks: parking_lot::Mutex::new(tasks),
            config,
        });

        let replay = Arc::new(SessionReplay {
            exchange: exchange.clone(),
            registry: Arc::clone(&registry),
            router: Arc::clone(&self.router),
        });
        if let Err(e) = connection
            .connect(Arc::clone(&adapter.dialer), replay, adapter.authenticator.clone())
            .await
        {
            tracing::error!(%exchange, error = %e, "initial connect failed");
            runtime.stop().await;
            self.forget(&exchange);
            return Err(e.into());
        }

        let period = (runtime.config.websocket.subscription_ack_timeout() / 4).max(MIN_MAINTENANCE_PERIOD);
        runtime.tasks.lock().push(tokio::spawn(exchange::maintain_subscriptions(
            registry,
            period,
            cancel,
        )));
        self.exchanges.insert(exchange.clone(), runtime);
        tracing::info!(%exchange, "exchange added");
        Ok(())
    }

    /// Disconnect an exchange and drop everything it fed
    pub async fn remove_exchange(&self, exchange: &ExchangeId) -> Result<()> {
        let (_, runtime) = self
            .exchanges
            .remove(exchange)
            .ok_or_else(|| GatewayError::UnknownExchange(exchange.clone()))?;
        runtime.stop().await;
        for key in self.store.keys_for(exchange) {
            self.router.untrack(key).await?;
        }
        self.trades.remove_exchange(exchange);
        self.forget(exchange);
        tracing::info!(%exchange, "exchange removed");
        Ok(())
    }

    /// Subscribe to channels on `exchange`
    ///
    /// Order book specs start their book's synchronization before the
    /// request goes out, so early diffs are buffered. Returns the specs put
    /// on the wire; already Active or in-flight specs are skipped.
    pub async fn subscribe(
        &self,
        exchange: &ExchangeId,
        specs: Vec<SubscriptionSpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionSpec>> {
        let runtime = self.runtime(exchange)?;
        for spec in &specs {
            runtime.config.ensure_supported(spec.asset)?;
        }

        let settings = SyncSettings::from(&runtime.config.orderbook);
        for spec in specs.iter().filter(|s| s.channel == Channel::OrderBook) {
            if let Some(key) = spec.book_key(exchange) {
                self.router.track(key, settings.clone()).await?;
            }
        }
        Ok(runtime.registry.subscribe(specs, cancel).await?)
    }

    /// Unsubscribe; order book and trade state of the specs is dropped
    pub async fn unsubscribe(
        &self,
        exchange: &ExchangeId,
        specs: Vec<SubscriptionSpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionSpec>> {
        let runtime = self.runtime(exchange)?;
        for spec in &specs {
            let Some(key) = spec.book_key(exchange) else {
                continue;
            };
            match spec.channel {
                Channel::OrderBook => self.router.untrack(key).await?,
                Channel::Trades => self.trades.remove(&key),
                Channel::Ticker | Channel::Account => {}
            }
        }
        Ok(runtime.registry.unsubscribe(specs, cancel).await?)
    }

    /// Push a decoded frame as if it came from `exchange`'s socket
    pub async fn dispatch(&self, exchange: &ExchangeId, frame: Frame) -> Result<()> {
        self.router.dispatch(exchange, frame).await
    }

    /// Latest fully applied book, or why there is none
    pub fn get_book(&self, key: &BookKey) -> std::result::Result<Arc<BookSnapshot>, NotSynced> {
        self.store.get(key)
    }

    pub fn book_state(&self, key: &BookKey) -> SyncState {
        self.store.state(key)
    }

    /// Shared read handle to the published books
    pub fn books(&self) -> BookStore {
        self.store.clone()
    }

    pub fn get_ticker(&self, key: &BookKey) -> Option<Ticker> {
        self.tickers.get(key)
    }

    /// Cached ticker, fetched over REST on a miss
    pub async fn fetch_ticker(&self, key: &BookKey, cancel: &CancellationToken) -> Result<Ticker> {
        let runtime = self.runtime(&key.exchange)?;
        runtime.config.ensure_supported(key.asset)?;
        self.tickers
            .fetch(key, runtime.tickers.as_ref(), &self.limiter, cancel)
            .await
    }

    /// Bulk ticker update; only enabled pairs are stored
    pub fn process_tickers(
        &self,
        exchange: &ExchangeId,
        asset: AssetType,
        tickers: impl IntoIterator<Item = Ticker>,
        enabled_pairs: &HashSet<Pair>,
    ) -> usize {
        self.tickers
            .process_tickers(exchange, asset, tickers, enabled_pairs)
    }

    pub fn get_account(&self, exchange: &ExchangeId) -> Option<AccountHoldings> {
        self.accounts.get(exchange)
    }

    /// Cached holdings, fetched over private REST on a miss
    pub async fn fetch_account(
        &self,
        exchange: &ExchangeId,
        cancel: &CancellationToken,
    ) -> Result<AccountHoldings> {
        let runtime = self.runtime(exchange)?;
        if let Some(holdings) = self.accounts.get(exchange) {
            return Ok(holdings);
        }
        let fetcher = runtime
            .accounts
            .as_ref()
            .ok_or_else(|| GatewayError::NoAccountSource(exchange.clone()))?;
        self.accounts
            .fetch(exchange, fetcher.as_ref(), &self.limiter, cancel)
            .await
    }

    /// Unflushed trades of `key`, oldest first; each is returned once
    pub fn flush_trades(&self, key: &BookKey) -> Vec<Trade> {
        self.trades.flush(key)
    }

    /// Throw away `key`'s book and fetch a fresh snapshot
    pub async fn resync(&self, key: &BookKey) -> Result<()> {
        self.runtime(&key.exchange)?;
        self.router.resync(key.clone()).await
    }

    pub fn subscriptions(&self, exchange: &ExchangeId) -> Result<Vec<Subscription>> {
        Ok(self.runtime(exchange)?.registry.subscriptions())
    }

    pub fn connection_state(&self, exchange: &ExchangeId) -> Option<ConnectionState> {
        self.exchanges
            .get(exchange)
            .map(|runtime| runtime.connection.state())
    }

    pub fn exchanges(&self) -> Vec<ExchangeId> {
        self.exchanges.iter().map(|e| e.key().clone()).collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Resolves once all lanes have handled every frame dispatched so far
    pub async fn sync_point(&self) -> Result<()> {
        self.router.sync_point().await
    }

    /// Close every connection, stop lanes and clear all state
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let runtimes: Vec<_> = self
            .exchanges
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        self.exchanges.clear();
        for runtime in runtimes {
            runtime.stop().await;
        }
        self.scheduler.shutdown();
        self.router.shutdown().await;
        self.store.clear();
        self.trades.clear();
        self.tickers.clear();
        self.accounts.clear();
        tracing::info!("market data service stopped");
    }

    fn runtime(&self, exchange: &ExchangeId) -> Result<Arc<ExchangeRuntime>> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        self.exchanges
            .get(exchange)
            .map(|runtime| Arc::clone(runtime.value()))
            .ok_or_else(|| GatewayError::UnknownExchange(exchange.clone()))
    }

    fn forget(&self, exchange: &ExchangeId) {
        self.router.unregister(exchange);
        self.scheduler.unregister(exchange);
        self.limiter.remove_exchange(exchange);
        self.tickers.remove_exchange(exchange);
        self.accounts.remove(exchange);
    }
}

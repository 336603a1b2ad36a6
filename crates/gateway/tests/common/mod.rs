//! Shared fixtures: a scripted exchange adapter over the in-memory transport

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use hermes_clock::SystemClock;
use hermes_core::{
    AccountHoldings, AssetType, Balance, BookKey, ExchangeId, OrderBook, Pair, PriceLevel, Sequence,
    SubAccount, Ticker,
};
use hermes_gateway::{
    ChannelDialer, ChannelServer, ExchangeAdapter, ExchangeConfig, GlobalConfig, JsonRpcCodec,
    MarketDataService, ServerConnection, StreamEvent,
};
use hermes_ports::{AccountFetcher, FetchError, SnapshotFetcher, TickerFetcher};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

pub const EXCHANGE: &str = "testex";

pub fn btc() -> BookKey {
    BookKey::spot(EXCHANGE, Pair::new("BTC", "USDT"))
}

pub fn eth() -> BookKey {
    BookKey::spot(EXCHANGE, Pair::new("ETH", "USDT"))
}

/// Snapshot with one bid at 10000 and one ask at 10001
pub fn book_at(sequence: Sequence) -> OrderBook {
    OrderBook::from_levels(
        [PriceLevel::new(dec!(10000), dec!(1))],
        [PriceLevel::new(dec!(10001), dec!(1))],
        sequence,
        Utc::now(),
    )
}

/// Serves whatever book was last installed for a key
///
/// While the gate is closed, fetches park until [`open`](Self::open).
pub struct ScriptedSnapshots {
    books: Mutex<HashMap<BookKey, OrderBook>>,
    failures: Mutex<HashMap<BookKey, FetchError>>,
    gate: watch::Sender<bool>,
    pub calls: AtomicUsize,
}

impl Default for ScriptedSnapshots {
    fn default() -> Self {
        ScriptedSnapshots {
            books: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gate: watch::Sender::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedSnapshots {
    pub fn close(&self) {
        self.gate.send_replace(false);
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn set(&self, key: &BookKey, book: OrderBook) {
        self.failures.lock().remove(key);
        self.books.lock().insert(key.clone(), book);
    }

    pub fn fail(&self, key: &BookKey, error: FetchError) {
        self.failures.lock().insert(key.clone(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotFetcher for ScriptedSnapshots {
    async fn fetch_snapshot(&self, key: &BookKey, _depth: u32) -> Result<OrderBook, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| FetchError::Network("gate dropped".into()))?;
        if let Some(error) = self.failures.lock().get(key) {
            return Err(error.clone());
        }
        self.books.lock().get(key).cloned().ok_or_else(|| FetchError::Api {
            code: 404,
            message: format!("no book for {key}"),
        })
    }
}

#[derive(Default)]
pub struct ScriptedTickers {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TickerFetcher for ScriptedTickers {
    async fn fetch_ticker(&self, key: &BookKey) -> Result<Ticker, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Ticker {
            key: key.clone(),
            last: dec!(100),
            high: dec!(110),
            low: dec!(90),
            bid: dec!(99),
            ask: dec!(101),
            volume: dec!(1000),
            last_updated: Utc::now(),
        })
    }
}

/// Private REST holdings: 1000 USDT with 250 on hold
#[derive(Default)]
pub struct ScriptedAccounts {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AccountFetcher for ScriptedAccounts {
    async fn fetch_account(&self, exchange: &ExchangeId) -> Result<AccountHoldings, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccountHoldings::new(exchange.clone()).with_account(SubAccount {
            id: "main".into(),
            asset: AssetType::Spot,
            balances: vec![Balance::new("usdt", dec!(1000), dec!(250))],
        }))
    }
}

pub struct TestExchange {
    pub service: MarketDataService,
    pub server: ChannelServer,
    pub socket: ServerConnection,
    pub snapshots: Arc<ScriptedSnapshots>,
    pub tickers: Arc<ScriptedTickers>,
    pub accounts: Arc<ScriptedAccounts>,
    pub events: broadcast::Receiver<StreamEvent>,
}

pub fn exchange_config() -> ExchangeConfig {
    let mut config = ExchangeConfig::new(EXCHANGE, "mem://testex");
    config.websocket.response_check_timeout_ms = 3_600_000;
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.jitter = 0.0;
    config
}

/// Service with one connected exchange backed by the in-memory transport
pub async fn start(config: ExchangeConfig) -> TestExchange {
    let global = GlobalConfig {
        lanes: 2,
        ..GlobalConfig::default()
    };
    let service = MarketDataService::new(global, Arc::new(SystemClock)).unwrap();
    let events = service.subscribe_events();
    let snapshots = Arc::new(ScriptedSnapshots::default());
    let tickers = Arc::new(ScriptedTickers::default());
    let accounts = Arc::new(ScriptedAccounts::default());
    let (dialer, mut server) = ChannelDialer::pair();

    let adapter = ExchangeAdapter::new(
        Arc::new(JsonRpcCodec::new(EXCHANGE)),
        snapshots.clone(),
        tickers.clone(),
        Arc::new(dialer),
    )
    .with_account_fetcher(accounts.clone());
    service.add_exchange(config, adapter).await.unwrap();
    let socket = server.accept().await.unwrap();

    TestExchange {
        service,
        server,
        socket,
        snapshots,
        tickers,
        accounts,
        events,
    }
}

/// Answer the next client request with a success ack; returns the request
pub async fn ack_next(socket: &mut ServerConnection) -> Value {
    let text = socket.recv().await.unwrap();
    let request: Value = serde_json::from_str(&text).unwrap();
    socket.send_text(format!(r#"{{"result":null,"id":{}}}"#, request["id"]));
    request
}

/// Binance-style depth diff envelope
pub fn depth(symbol: &str, sequence: Sequence, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> String {
    let levels = |side: &[(&str, &str)]| {
        side.iter()
            .map(|(p, q)| format!(r#"["{p}","{q}"]"#))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        r#"{{"stream":"{symbol}@depth","data":{{"e":"depthUpdate","E":{},"s":"{}","u":{sequence},"b":[{}],"a":[{}]}}}}"#,
        Utc::now().timestamp_millis(),
        symbol.to_uppercase(),
        levels(bids),
        levels(asks),
    )
}

pub fn trade(symbol: &str, id: u64, price: &str, time_ms: i64) -> String {
    format!(
        r#"{{"stream":"{symbol}@trade","data":{{"e":"trade","E":{time_ms},"s":"{}","t":{id},"p":"{price}","q":"1","T":{time_ms},"m":false}}}}"#,
        symbol.to_uppercase(),
    )
}

/// Next event matching `pred`, skipping others
pub async fn next_event(
    events: &mut broadcast::Receiver<StreamEvent>,
    mut pred: impl FnMut(&StreamEvent) -> bool,
) -> StreamEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for event")
}

/// Poll `check` until it holds, with a sync point between attempts
pub async fn eventually<F, Fut>(service: &MarketDataService, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        service.sync_point().await.unwrap();
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

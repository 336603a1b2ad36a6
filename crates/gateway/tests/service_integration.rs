//! End-to-end tests of the market data service
//!
//! Each test runs the full engine against a scripted exchange on the
//! in-memory transport:
//!
//! 1. `MarketDataService` dials the exchange and replays (nothing) on connect
//! 2. Subscriptions go out as JSON-RPC requests and the test acks them
//! 3. Depth diffs arrive over the socket or are dispatched directly
//! 4. Snapshots come from a scripted REST fetcher
//! 5. Readers only ever see a synced book or "not synced"

mod common;

use chrono::Utc;
use common::*;
use hermes_core::{
    AccountHoldings, AssetType, Balance, BookDelta, ConnectionState, Frame, Pair, Side, SubAccount,
    SubscriptionSpec, SubscriptionState, Trade,
};
use hermes_clock::SystemClock;
use hermes_gateway::{
    ChannelDialer, ConfigError, ExchangeAdapter, GatewayError, GlobalConfig, JsonRpcCodec,
    MarketDataService, ResyncReason, StreamEvent, SyncState,
};
use hermes_ports::FetchError;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

fn btc_book() -> SubscriptionSpec {
    SubscriptionSpec::order_book(Pair::new("BTC", "USDT"), AssetType::Spot)
}

/// Subscribe to the BTC book, ack it and wait until it is synced at `sequence`
async fn sync_btc(ex: &mut TestExchange, sequence: u64) {
    ex.snapshots.set(&btc(), book_at(sequence));
    let cancel = CancellationToken::new();
    let sent = ex
        .service
        .subscribe(&btc().exchange, vec![btc_book()], &cancel)
        .await
        .unwrap();
    assert_eq!(sent, vec![btc_book()]);

    let request = ack_next(&mut ex.socket).await;
    assert_eq!(request["method"], "SUBSCRIBE");
    assert_eq!(request["params"][0], "btcusdt@depth");

    next_event(&mut ex.events, |e| {
        matches!(e, StreamEvent::BookSynced { key, sequence: s } if *key == btc() && *s == sequence)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_book_follows_socket_diffs() {
    // === Setup: connected exchange with a synced book ===
    let mut ex = start(exchange_config()).await;
    sync_btc(&mut ex, 100).await;

    let book = ex.service.get_book(&btc()).unwrap();
    assert_eq!(book.sequence, 100);
    assert_eq!(book.best_bid().unwrap().price, dec!(10000));

    // === Diffs over the wire ===
    ex.socket
        .send_text(depth("btcusdt", 101, &[("10000", "0"), ("9999", "2")], &[]));
    ex.socket.send_text(depth("btcusdt", 102, &[], &[("10001", "3")]));

    let service = &ex.service;
    eventually(service, || async {
        service.get_book(&btc()).is_ok_and(|b| b.sequence == 102)
    })
    .await;

    let book = service.get_book(&btc()).unwrap();
    assert_eq!(book.best_bid().unwrap().price, dec!(9999));
    assert_eq!(book.best_bid().unwrap().amount, dec!(2));
    assert_eq!(book.best_ask().unwrap().amount, dec!(3));

    let subs = service.subscriptions(&btc().exchange).unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].state, SubscriptionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_diffs_before_snapshot_are_buffered() {
    let mut ex = start(exchange_config()).await;
    ex.snapshots.close();
    ex.snapshots.set(&btc(), book_at(100));

    let cancel = CancellationToken::new();
    ex.service
        .subscribe(&btc().exchange, vec![btc_book()], &cancel)
        .await
        .unwrap();
    ack_next(&mut ex.socket).await;

    // === Diffs straddling the snapshot sequence, snapshot still in flight ===
    let exchange = btc().exchange;
    for (sequence, price) in [(99, dec!(9990)), (100, dec!(9991)), (101, dec!(9992)), (102, dec!(9993))] {
        let delta = BookDelta::new(btc(), sequence, Utc::now()).bid(price, dec!(1));
        ex.service.dispatch(&exchange, Frame::Book(delta)).await.unwrap();
    }
    ex.service.sync_point().await.unwrap();
    assert_eq!(ex.service.book_state(&btc()), SyncState::AwaitingSnapshot);
    assert!(ex.service.get_book(&btc()).is_err());

    // === Snapshot lands at 100: 99 and 100 are discarded, 101 and 102 replayed ===
    ex.snapshots.open();
    next_event(&mut ex.events, |e| {
        matches!(e, StreamEvent::BookSynced { sequence: 102, .. })
    })
    .await;

    let book = ex.service.get_book(&btc()).unwrap();
    let bids: Vec<_> = book.bids.iter().map(|l| l.price).collect();
    assert_eq!(bids, vec![dec!(10000), dec!(9993), dec!(9992)]);
}

#[tokio::test(start_paused = true)]
async fn test_unfilled_gap_overflows_into_resync() {
    let mut ex = start(exchange_config()).await;
    sync_btc(&mut ex, 100).await;
    ex.snapshots.set(&btc(), book_at(200));

    // 101 never arrives; one more than the buffer limit overflows
    let limit = exchange_config().orderbook.buffer_limit as u64;
    let exchange = btc().exchange;
    for sequence in 102..=102 + limit {
        let delta = BookDelta::new(btc(), sequence, Utc::now()).ask(dec!(10002), dec!(1));
        ex.service.dispatch(&exchange, Frame::Book(delta)).await.unwrap();
    }

    let event = next_event(&mut ex.events, |e| matches!(e, StreamEvent::BookResyncing { .. })).await;
    assert!(matches!(
        event,
        StreamEvent::BookResyncing {
            reason: ResyncReason::BufferOverflow { .. },
            ..
        }
    ));

    next_event(&mut ex.events, |e| {
        matches!(e, StreamEvent::BookSynced { sequence: 200, .. })
    })
    .await;
    assert_eq!(ex.service.get_book(&btc()).unwrap().sequence, 200);
    assert_eq!(ex.snapshots.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_invalidates_books_and_replays() {
    let mut ex = start(exchange_config()).await;
    sync_btc(&mut ex, 100).await;
    ex.snapshots.close();
    ex.snapshots.set(&btc(), book_at(300));

    // === Exchange drops the socket ===
    let TestExchange {
        service,
        mut server,
        socket,
        snapshots,
        mut events,
        ..
    } = ex;
    socket.disconnect();

    next_event(&mut events, |e| {
        matches!(e, StreamEvent::BookResyncing { reason: ResyncReason::ConnectionLost, .. })
    })
    .await;
    assert!(service.get_book(&btc()).is_err());

    // === Fresh socket gets the subscription replayed ===
    let mut socket = server.accept().await.unwrap();
    let request = ack_next(&mut socket).await;
    assert_eq!(request["method"], "SUBSCRIBE");
    assert_eq!(request["params"][0], "btcusdt@depth");
    next_event(&mut events, |e| {
        matches!(e, StreamEvent::ConnectionStateChanged { state: ConnectionState::Ready, .. })
    })
    .await;

    // The old book never comes back
    service.sync_point().await.unwrap();
    assert!(service.get_book(&btc()).is_err());

    snapshots.open();
    next_event(&mut events, |e| {
        matches!(e, StreamEvent::BookSynced { sequence: 300, .. })
    })
    .await;
    assert_eq!(service.get_book(&btc()).unwrap().sequence, 300);
    assert_eq!(server.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_failure_then_manual_resync() {
    let mut ex = start(exchange_config()).await;
    ex.snapshots.fail(
        &btc(),
        FetchError::Api {
            code: 503,
            message: "maintenance".into(),
        },
    );

    let cancel = CancellationToken::new();
    ex.service
        .subscribe(&btc().exchange, vec![btc_book()], &cancel)
        .await
        .unwrap();
    ack_next(&mut ex.socket).await;

    let event = next_event(&mut ex.events, |e| matches!(e, StreamEvent::SnapshotFailed { .. })).await;
    assert!(matches!(
        event,
        StreamEvent::SnapshotFailed {
            error: FetchError::Api { code: 503, .. },
            ..
        }
    ));
    ex.service.sync_point().await.unwrap();
    assert_eq!(ex.service.book_state(&btc()), SyncState::AwaitingSnapshot);

    ex.snapshots.set(&btc(), book_at(400));
    ex.service.resync(&btc()).await.unwrap();
    next_event(&mut ex.events, |e| {
        matches!(e, StreamEvent::BookSynced { sequence: 400, .. })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_drops_book() {
    let mut ex = start(exchange_config()).await;
    sync_btc(&mut ex, 100).await;

    let cancel = CancellationToken::new();
    ex.service
        .unsubscribe(&btc().exchange, vec![btc_book()], &cancel)
        .await
        .unwrap();
    let request = ack_next(&mut ex.socket).await;
    assert_eq!(request["method"], "UNSUBSCRIBE");

    let service = &ex.service;
    eventually(service, || async {
        service.subscriptions(&btc().exchange).unwrap().is_empty()
    })
    .await;
    assert_eq!(service.book_state(&btc()), SyncState::Uninitialized);
    assert!(service.books().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_asset_rejected() {
    let mut ex = start(exchange_config()).await;
    let spec = SubscriptionSpec::order_book(Pair::new("BTC", "USDT"), AssetType::PerpetualSwap);

    let err = ex
        .service
        .subscribe(&btc().exchange, vec![spec], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Config(ConfigError::UnsupportedAsset {
            asset: AssetType::PerpetualSwap,
            ..
        })
    ));
    assert!(ex.socket.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_messages_reported() {
    let mut ex = start(exchange_config()).await;

    ex.socket
        .send_text(r#"{"stream":"dogeusdt@depth","data":{"u":1,"E":0}}"#);
    let event = next_event(&mut ex.events, |e| matches!(e, StreamEvent::FrameDropped { .. })).await;
    assert!(matches!(event, StreamEvent::FrameDropped { ref kind, .. } if kind == "unrecognized"));

    ex.socket.send_text("not json");
    let event = next_event(&mut ex.events, |e| matches!(e, StreamEvent::FrameDropped { .. })).await;
    assert!(matches!(event, StreamEvent::FrameDropped { ref kind, .. } if kind == "malformed"));

    // Neither disturbs the connection
    assert_eq!(
        ex.service.connection_state(&btc().exchange),
        Some(ConnectionState::Ready)
    );
}

#[tokio::test(start_paused = true)]
async fn test_trades_deduplicated_and_flushed_in_time_order() {
    let mut ex = start(exchange_config()).await;
    let spec = SubscriptionSpec::trades(Pair::new("BTC", "USDT"), AssetType::Spot);
    ex.service
        .subscribe(&btc().exchange, vec![spec], &CancellationToken::new())
        .await
        .unwrap();
    ack_next(&mut ex.socket).await;

    // === Same trade twice, plus an older one arriving late ===
    let now = Utc::now().timestamp_millis();
    ex.socket.send_text(trade("btcusdt", 7, "10000.5", now));
    ex.socket.send_text(trade("btcusdt", 7, "10000.5", now));
    ex.socket.send_text(trade("btcusdt", 6, "10000.1", now - 1_000));

    let service = &ex.service;
    let mut flushed: Vec<Trade> = Vec::new();
    eventually(service, || {
        flushed.extend(service.flush_trades(&btc()));
        let done = flushed.len() >= 2;
        async move { done }
    })
    .await;

    // The late trade may land in a separate flush; merge before checking
    flushed.sort_by_key(|t| t.timestamp);
    let ids: Vec<_> = flushed.iter().map(|t| t.exchange_trade_id.as_str()).collect();
    assert_eq!(ids, vec!["6", "7"]);
    assert_eq!(flushed[1].side, Side::Buy);
    assert!(service.flush_trades(&btc()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ticker_fetch_goes_through_cache() {
    let ex = start(exchange_config()).await;
    let cancel = CancellationToken::new();

    let first = ex.service.fetch_ticker(&eth(), &cancel).await.unwrap();
    let second = ex.service.fetch_ticker(&eth(), &cancel).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(ex.tickers.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ex.service.get_ticker(&eth()).unwrap().last, dec!(100));
}

#[tokio::test(start_paused = true)]
async fn test_account_fetch_goes_through_cache() {
    let ex = start(exchange_config()).await;
    let exchange = btc().exchange;
    let cancel = CancellationToken::new();
    assert!(ex.service.get_account(&exchange).is_none());

    let first = ex.service.fetch_account(&exchange, &cancel).await.unwrap();
    let second = ex.service.fetch_account(&exchange, &cancel).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.available("USDT"), dec!(750));
    assert_eq!(ex.accounts.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ex.service.get_account(&exchange), Some(first));
}

#[tokio::test(start_paused = true)]
async fn test_account_frames_replace_holdings() {
    let ex = start(exchange_config()).await;
    let exchange = btc().exchange;
    let holdings = AccountHoldings::new(EXCHANGE).with_account(SubAccount {
        id: "main".into(),
        asset: AssetType::Spot,
        balances: vec![Balance::new("usdt", dec!(250), dec!(50))],
    });

    ex.service
        .dispatch(&exchange, Frame::Account(holdings.clone()))
        .await
        .unwrap();

    let stored = ex.service.get_account(&exchange).unwrap();
    assert_eq!(stored, holdings);
    assert_eq!(stored.available("USDT"), dec!(200));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_clears_state_and_rejects_calls() {
    let mut ex = start(exchange_config()).await;
    sync_btc(&mut ex, 100).await;

    ex.service.shutdown().await;

    assert!(ex.service.books().is_empty());
    assert!(ex.service.exchanges().is_empty());
    let err = ex
        .service
        .subscribe(&btc().exchange, vec![btc_book()], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_exchange_rejected() {
    let ex = start(exchange_config()).await;
    let (dialer, _server) = ChannelDialer::pair();
    let adapter = ExchangeAdapter::new(
        Arc::new(JsonRpcCodec::new(EXCHANGE)),
        ex.snapshots.clone(),
        ex.tickers.clone(),
        Arc::new(dialer),
    );

    let err = ex
        .service
        .add_exchange(exchange_config(), adapter)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::DuplicateExchange(_)));
    assert_eq!(ex.service.exchanges().len(), 1);
}

#[tokio::test]
async fn test_invalid_global_config_rejected() {
    for global in [
        GlobalConfig {
            event_capacity: 0,
            ..GlobalConfig::default()
        },
        GlobalConfig {
            inbound_capacity: 0,
            ..GlobalConfig::default()
        },
        GlobalConfig {
            lanes: 0,
            ..GlobalConfig::default()
        },
    ] {
        let err = MarketDataService::new(global, Arc::new(SystemClock))
            .err()
            .expect("invalid config must be rejected");
        assert!(matches!(err, GatewayError::Config(ConfigError::Invalid { .. })));
    }
}

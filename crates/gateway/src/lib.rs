//! Hermes Gateway
//!
//! Market data engine for the Hermes trading system. Provides:
//! - Supervised exchange connections (watchdog, backoff, subscription replay)
//! - Subscription bookkeeping with acks, batching and optimistic activation
//! - Per-book snapshot + diff reconciliation with self-healing resyncs
//! - Trade deduplication and last-write-wins ticker/account caches
//! - Token-bucket rate limiting per exchange endpoint class
//!
//! ## Architecture
//!
//! ```text
//!  Exchange socket ──► ConnectionHandle ──► FrameCodec::decode
//!         ▲                                      │ Frame
//!         │ (un)subscribe                  ┌─────▼─────┐
//!  SubscriptionRegistry ◄──── acks ─────── │  Message  │
//!         │                                │  Router   │
//!    RateLimiter                           └─────┬─────┘
//!         │                       hash(BookKey)  │
//!  SnapshotScheduler ──► lane 0 .. lane N ◄──────┘
//!    (REST fetch)          Synchronizer ──► BookStore (ArcSwap per key)
//!                          TradeBuffer / TickerCache
//! ```
//!
//! ## Reading books
//!
//! [`MarketDataService::get_book`] returns either a fully applied
//! [`BookSnapshot`](hermes_core::BookSnapshot) or [`NotSynced`]; a book that
//! is being rebuilt is never served.

pub mod adapter;
pub mod cache;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod orderbook;
pub mod ratelimit;
pub mod router;
pub mod service;
pub mod subscription;
pub mod telemetry;
pub mod trades;
pub mod transport;

// Re-export commonly used types
pub use adapter::ExchangeAdapter;
pub use cache::{AccountCache, KeyedCache, TickerCache};
pub use codec::JsonRpcCodec;
pub use config::{
    ConfigError, ExchangeConfig, GatewayConfigFile, GlobalConfig, load_config,
    load_config_from_str, load_default_config,
};
pub use connection::{ConnectionHandle, SubscriptionReplay};
pub use error::{GatewayError, Result, TransportError};
pub use events::{EventBus, StreamEvent};
pub use orderbook::{BookStore, BookView, NotSynced, ResyncReason, SyncSettings, SyncState};
pub use ratelimit::{EndpointClass, EndpointKind, RateLimitError, RateLimiter};
pub use router::MessageRouter;
pub use service::MarketDataService;
pub use subscription::{SubscriptionError, SubscriptionRegistry};
pub use trades::TradeBuffer;
pub use transport::{
    Authenticator, Dialer, FrameSink, FrameSource, Inbound,
    channel::{ChannelDialer, ChannelServer, ServerConnection},
    websocket::TungsteniteDialer,
};

//! Hermes Core Domain
//!
//! Pure market data types for the Hermes engine: book identity, price levels,
//! the order book itself, trades, tickers, account holdings and the canonical
//! frames exchange adapters hand to the engine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod book;
pub mod entities;
pub mod market;
pub mod values;

// Re-export commonly used types at crate root
pub use book::{BookDelta, BookError, BookSnapshot, LevelChange, OrderBook, PendingUpdate};
pub use entities::{
    AccountHoldings, AckOutcome, Balance, BookSide, Channel, ConnectionState, Frame, PriceLevel,
    Side, SubAccount, Subscription, SubscriptionSpec, SubscriptionState, Ticker, Trade,
};
pub use market::{AssetType, BookKey, ExchangeId, Pair, PairParseError};
pub use values::{Price, Quantity, Sequence, Timestamp};

//! Order book state and the diffs that move it.
//!
//! `OrderBook` is the mutable working copy owned by exactly one processing
//! lane. `BookSnapshot` is the immutable view handed to readers.

mod delta;
mod error;
mod order_book;
mod snapshot;

pub use delta::{BookDelta, LevelChange, PendingUpdate};
pub use error::BookError;
pub use order_book::OrderBook;
pub use snapshot::BookSnapshot;

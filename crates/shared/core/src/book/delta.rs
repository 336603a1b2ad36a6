use serde::{Deserialize, Serialize};

use crate::entities::{BookSide, PriceLevel};
use crate::market::BookKey;
use crate::values::{Price, Quantity, Sequence, Timestamp};

/// A single level change inside a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: BookSide,
    pub level: PriceLevel,
}

/// One sequence-numbered diff message for one book
///
/// Every change in a delta shares its sequence and is applied as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDelta {
    pub key: BookKey,
    pub sequence: Sequence,
    pub changes: Vec<LevelChange>,
    pub timestamp: Timestamp,
}

impl BookDelta {
    pub fn new(key: BookKey, sequence: Sequence, timestamp: Timestamp) -> Self {
        BookDelta {
            key,
            sequence,
            changes: Vec::new(),
            timestamp,
        }
    }

    pub fn bid(self, price: Price, amount: Quantity) -> Self {
        self.level(BookSide::Bid, PriceLevel::new(price, amount))
    }

    pub fn ask(self, price: Price, amount: Quantity) -> Self {
        self.level(BookSide::Ask, PriceLevel::new(price, amount))
    }

    pub fn level(mut self, side: BookSide, level: PriceLevel) -> Self {
        self.changes.push(LevelChange { side, level });
        self
    }

    /// Split into per-level buffer entries, preserving order
    pub fn into_pending(self) -> impl Iterator<Item = PendingUpdate> {
        let sequence = self.sequence;
        let timestamp = self.timestamp;
        self.changes.into_iter().map(move |change| PendingUpdate {
            sequence,
            side: change.side,
            level: change.level,
            timestamp,
        })
    }
}

/// A buffered level change waiting for its sequence gap to fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    pub sequence: Sequence,
    pub side: BookSide,
    pub level: PriceLevel,
    pub timestamp: Timestamp,
}

impl PendingUpdate {
    pub fn change(&self) -> LevelChange {
        LevelChange {
            side: self.side,
            level: self.level,
        }
    }
}

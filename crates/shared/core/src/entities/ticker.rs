use serde::{Deserialize, Serialize};

use crate::market::BookKey;
use crate::values::{Price, Quantity, Timestamp};

/// Latest 24h ticker for one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub key: BookKey,
    pub last: Price,
    pub high: Price,
    pub low: Price,
    pub bid: Price,
    pub ask: Price,
    pub volume: Quantity,
    pub last_updated: Timestamp,
}

impl Ticker {
    /// Midpoint of the quoted bid and ask
    pub fn mid(&self) -> Price {
        (self.bid + self.ask) / Price::TWO
    }
}

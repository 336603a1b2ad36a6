use serde::{Deserialize, Serialize};

use crate::entities::PriceLevel;
use crate::market::BookKey;
use crate::values::{Price, Quantity, Sequence, Timestamp};

/// Immutable, fully applied view of a book
///
/// `bids` are sorted best (highest) first, `asks` best (lowest) first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub key: BookKey,
    pub sequence: Sequence,
    pub last_updated: Timestamp,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn mid_price(&self) -> Option<Price> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        Some((bid + ask) / Price::TWO)
    }

    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn top_bids(&self, n: usize) -> &[PriceLevel] {
        &self.bids[..n.min(self.bids.len())]
    }

    pub fn top_asks(&self, n: usize) -> &[PriceLevel] {
        &self.asks[..n.min(self.asks.len())]
    }

    /// Bid volume resting at or above `price`
    pub fn bid_volume_to_price(&self, price: Price) -> Quantity {
        self.bids
            .iter()
            .take_while(|l| l.price >= price)
            .map(|l| l.amount)
            .sum()
    }

    /// Ask volume resting at or below `price`
    pub fn ask_volume_to_price(&self, price: Price) -> Quantity {
        self.asks
            .iter()
            .take_while(|l| l.price <= price)
            .map(|l| l.amount)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

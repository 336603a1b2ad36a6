use std::collections::BTreeMap;

use super::{BookError, BookSnapshot, LevelChange};
use crate::entities::{BookSide, PriceLevel};
use crate::market::BookKey;
use crate::values::{Price, Quantity, Sequence, Timestamp};

/// Working copy of an order book
///
/// Levels are keyed by price; bids iterate descending, asks ascending.
/// A zero amount deletes the level. When verification is enabled, every
/// apply is followed by a check that amounts are non-negative and the best
/// bid is strictly below the best ask; on failure the book must be discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    bids: BTreeMap<Price, PriceLevel>,
    asks: BTreeMap<Price, PriceLevel>,
    sequence: Sequence,
    last_updated: Timestamp,
    verify: bool,
}

impl OrderBook {
    pub fn new(sequence: Sequence, last_updated: Timestamp) -> Self {
        OrderBook {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence,
            last_updated,
            verify: false,
        }
    }

    /// Build a book from full snapshot levels; zero-amount levels are skipped
    pub fn from_levels(
        bids: impl IntoIterator<Item = PriceLevel>,
        asks: impl IntoIterator<Item = PriceLevel>,
        sequence: Sequence,
        last_updated: Timestamp,
    ) -> Self {
        let mut book = Self::new(sequence, last_updated);
        for level in bids {
            book.set_level(BookSide::Bid, level);
        }
        for level in asks {
            book.set_level(BookSide::Ask, level);
        }
        book
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn verification(&self) -> bool {
        self.verify
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    /// Upsert a level, or remove it when the amount is zero
    pub fn set_level(&mut self, side: BookSide, level: PriceLevel) {
        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        if level.is_removal() {
            levels.remove(&level.price);
        } else {
            levels.insert(level.price, level);
        }
    }

    /// Apply a set of changes that share `sequence`
    ///
    /// Refuses sequences at or below the current one without touching the
    /// book. Invalid levels are rejected before any change is made; a crossed
    /// result is only detected after the changes land, so a `Crossed` error
    /// leaves the book mutated.
    pub fn apply<'a>(
        &mut self,
        sequence: Sequence,
        changes: impl IntoIterator<Item = &'a LevelChange> + Clone,
        timestamp: Timestamp,
    ) -> Result<(), BookError> {
        if sequence <= self.sequence {
            return Err(BookError::StaleSequence {
                current: self.sequence,
                received: sequence,
            });
        }
        if self.verify {
            for change in changes.clone() {
                check_level(&change.level)?;
            }
        }
        for change in changes {
            self.set_level(change.side, change.level);
        }
        self.sequence = sequence;
        self.last_updated = timestamp;
        if self.verify {
            self.check_crossed()?;
        }
        Ok(())
    }

    /// Full verification of the current state, regardless of the flag
    pub fn verify(&self) -> Result<(), BookError> {
        for level in self.bids.values().chain(self.asks.values()) {
            check_level(level)?;
        }
        self.check_crossed()
    }

    fn check_crossed(&self) -> Result<(), BookError> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid.price >= ask.price => Err(BookError::Crossed {
                bid: bid.price,
                ask: ask.price,
            }),
            _ => Ok(()),
        }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.values().next_back()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.values().next()
    }

    pub fn is_crossed(&self) -> bool {
        self.check_crossed().is_err()
    }

    /// Bids from best (highest) to worst
    pub fn bids(&self) -> impl Iterator<Item = &PriceLevel> {
        self.bids.values().rev()
    }

    /// Asks from best (lowest) to worst
    pub fn asks(&self) -> impl Iterator<Item = &PriceLevel> {
        self.asks.values()
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Immutable copy for publication
    pub fn snapshot(&self, key: &BookKey) -> BookSnapshot {
        BookSnapshot {
            key: key.clone(),
            sequence: self.sequence,
            last_updated: self.last_updated,
            bids: self.bids().copied().collect(),
            asks: self.asks().copied().collect(),
        }
    }
}

fn check_level(level: &PriceLevel) -> Result<(), BookError> {
    if level.price <= Price::ZERO {
        return Err(BookError::NonPositivePrice { price: level.price });
    }
    if level.amount < Quantity::ZERO {
        return Err(BookError::NegativeAmount {
            price: level.price,
            amount: level.amount,
        });
    }
    Ok(())
}

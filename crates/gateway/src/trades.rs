//! Per-book trade deduplication and ordered hand-off

use dashmap::DashMap;
use hermes_core::{BookKey, ExchangeId, Trade};
use std::collections::{HashSet, VecDeque};

#[derive(Default)]
struct TradeWindow {
    /// Not yet flushed, in arrival order
    pending: Vec<Trade>,
    /// Trade ids remembered for deduplication
    seen: HashSet<String>,
    /// `seen` in insertion order, for eviction
    order: VecDeque<String>,
}

/// Deduplicating trade buffer keyed by book
///
/// A trade id is remembered for the last `history_limit` trades of its book,
/// so late duplicates inside that window are dropped even after a flush.
/// Unflushed trades beyond `pending_limit` are evicted oldest first.
pub struct TradeBuffer {
    windows: DashMap<BookKey, TradeWindow>,
    history_limit: usize,
    pending_limit: usize,
}

impl TradeBuffer {
    pub fn new(history_limit: usize, pending_limit: usize) -> Self {
        Self {
            windows: DashMap::new(),
            history_limit: history_limit.max(1),
            pending_limit: pending_limit.max(1),
        }
    }

    /// Buffer `trade`; returns false for a duplicate id
    pub fn add(&self, trade: Trade) -> bool {
        let mut window = self.windows.entry(trade.key.clone()).or_default();
        if window.seen.contains(&trade.exchange_trade_id) {
            tracing::trace!(key = %trade.key, id = %trade.exchange_trade_id, "duplicate trade dropped");
            return false;
        }

        window.seen.insert(trade.exchange_trade_id.clone());
        window.order.push_back(trade.exchange_trade_id.clone());
        while window.order.len() > self.history_limit {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
            }
        }

        window.pending.push(trade);
        if window.pending.len() > self.pending_limit {
            let dropped = window.pending.remove(0);
            tracing::warn!(key = %dropped.key, id = %dropped.exchange_trade_id, "trade buffer full, dropped oldest");
        }
        true
    }

    /// Take every unflushed trade of `key`, oldest timestamp first
    ///
    /// Trades with equal timestamps keep arrival order. Each trade is
    /// returned by at most one flush.
    pub fn flush(&self, key: &BookKey) -> Vec<Trade> {
        let Some(mut window) = self.windows.get_mut(key) else {
            return Vec::new();
        };
        let mut trades = std::mem::take(&mut window.pending);
        drop(window);
        trades.sort_by_key(|t| t.timestamp);
        trades
    }

    pub fn pending(&self, key: &BookKey) -> usize {
        self.windows.get(key).map_or(0, |w| w.pending.len())
    }

    pub fn remove(&self, key: &BookKey) {
        self.windows.remove(key);
    }

    pub fn remove_exchange(&self, exchange: &ExchangeId) {
        self.windows.retain(|key, _| &key.exchange != exchange);
    }

    pub fn clear(&self) {
        self.windows.clear();
    }
}

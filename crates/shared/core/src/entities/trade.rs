use serde::{Deserialize, Serialize};

use super::Side;
use crate::market::BookKey;
use crate::values::{Price, Quantity, Timestamp};

/// Public trade print reported by an exchange
///
/// `exchange_trade_id` is the venue's own identifier and the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub exchange_trade_id: String,
    pub key: BookKey,
    /// Taker side
    pub side: Side,
    pub price: Price,
    pub amount: Quantity,
    pub timestamp: Timestamp,
}

impl Trade {
    pub fn new(
        exchange_trade_id: impl Into<String>,
        key: BookKey,
        side: Side,
        price: Price,
        amount: Quantity,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            exchange_trade_id: exchange_trade_id.into(),
            key,
            side,
            price,
            amount,
            timestamp,
        }
    }
}

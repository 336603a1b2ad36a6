use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AssetType, ExchangeId, Pair};

/// Identity of one order book: (exchange, pair, asset)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookKey {
    pub exchange: ExchangeId,
    pub pair: Pair,
    pub asset: AssetType,
}

impl BookKey {
    pub fn new(exchange: impl Into<ExchangeId>, pair: Pair, asset: AssetType) -> Self {
        BookKey {
            exchange: exchange.into(),
            pair,
            asset,
        }
    }

    pub fn spot(exchange: impl Into<ExchangeId>, pair: Pair) -> Self {
        Self::new(exchange, pair, AssetType::Spot)
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.pair, self.asset)
    }
}

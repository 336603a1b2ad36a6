use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::{AssetType, BookKey, ExchangeId, Pair};

/// Stream channel kinds the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    OrderBook,
    Trades,
    Ticker,
    Account,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::OrderBook => "orderbook",
            Channel::Trades => "trades",
            Channel::Ticker => "ticker",
            Channel::Account => "account",
        }
    }
}

/// One desired stream on one exchange connection
///
/// `pair` is `None` for account-wide channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub channel: Channel,
    pub pair: Option<Pair>,
    pub asset: AssetType,
}

impl SubscriptionSpec {
    pub fn order_book(pair: Pair, asset: AssetType) -> Self {
        SubscriptionSpec {
            channel: Channel::OrderBook,
            pair: Some(pair),
            asset,
        }
    }

    pub fn trades(pair: Pair, asset: AssetType) -> Self {
        SubscriptionSpec {
            channel: Channel::Trades,
            pair: Some(pair),
            asset,
        }
    }

    pub fn ticker(pair: Pair, asset: AssetType) -> Self {
        SubscriptionSpec {
            channel: Channel::Ticker,
            pair: Some(pair),
            asset,
        }
    }

    pub fn account(asset: AssetType) -> Self {
        SubscriptionSpec {
            channel: Channel::Account,
            pair: None,
            asset,
        }
    }

    /// Book this stream feeds, if it is pair-scoped
    pub fn book_key(&self, exchange: &ExchangeId) -> Option<BookKey> {
        self.pair
            .as_ref()
            .map(|pair| BookKey::new(exchange.clone(), pair.clone(), self.asset))
    }
}

impl fmt::Display for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pair {
            Some(pair) => write!(f, "{}:{}:{}", self.channel.as_str(), pair, self.asset),
            None => write!(f, "{}:{}", self.channel.as_str(), self.asset),
        }
    }
}

/// Lifecycle of a subscription on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// Requested, not yet acknowledged
    Pending,
    /// Acknowledged (or optimistically activated)
    Active,
    /// Unsubscribe sent, awaiting acknowledgement
    Unsubscribing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub spec: SubscriptionSpec,
    pub state: SubscriptionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_book_key() {
        let spec = SubscriptionSpec::order_book(Pair::new("ETH", "USDT"), AssetType::Spot);
        let key = spec.book_key(&ExchangeId::new("binance")).unwrap();
        assert_eq!(key.to_string(), "binance:ETH-USDT:spot");

        let account = SubscriptionSpec::account(AssetType::Spot);
        assert!(account.book_key(&ExchangeId::new("binance")).is_none());
        assert_eq!(account.to_string(), "account:spot");
    }
}

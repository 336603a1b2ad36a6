use serde::{Deserialize, Serialize};

use super::{AccountHoldings, Ticker, Trade};
use crate::book::BookDelta;
use crate::market::{BookKey, ExchangeId};

/// Result of a subscribe/unsubscribe request as reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckOutcome {
    Ok,
    Rejected(String),
}

/// Canonical inbound message produced by an exchange adapter's decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Sequence-numbered order book diff
    Book(BookDelta),
    /// Feed says the book can no longer be trusted
    Invalidate { key: BookKey, reason: String },
    Trade(Trade),
    Ticker(Ticker),
    Account(AccountHoldings),
    /// Response to a request sent with `request_id`
    Ack {
        exchange: ExchangeId,
        request_id: u64,
        outcome: AckOutcome,
    },
    Heartbeat,
    /// Decoded envelope with a channel the adapter does not map
    Unrecognized { channel: String },
}

impl Frame {
    /// Book this frame must be processed in order with, if any
    pub fn key(&self) -> Option<&BookKey> {
        match self {
            Frame::Book(delta) => Some(&delta.key),
            Frame::Invalidate { key, .. } => Some(key),
            Frame::Trade(trade) => Some(&trade.key),
            Frame::Ticker(ticker) => Some(&ticker.key),
            Frame::Account(_) | Frame::Ack { .. } | Frame::Heartbeat | Frame::Unrecognized { .. } => {
                None
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Book(_) => "book",
            Frame::Invalidate { .. } => "invalidate",
            Frame::Trade(_) => "trade",
            Frame::Ticker(_) => "ticker",
            Frame::Account(_) => "account",
            Frame::Ack { .. } => "ack",
            Frame::Heartbeat => "heartbeat",
            Frame::Unrecognized { .. } => "unrecognized",
        }
    }
}

use thiserror::Error;

use crate::values::{Price, Quantity, Sequence};

/// Reasons a book mutation is refused or leaves the book unusable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("negative amount {amount} at price {price}")]
    NegativeAmount { price: Price, amount: Quantity },

    #[error("non-positive price {price}")]
    NonPositivePrice { price: Price },

    #[error("crossed book: best bid {bid} >= best ask {ask}")]
    Crossed { bid: Price, ask: Price },

    #[error("stale sequence {received}, book is at {current}")]
    StaleSequence { current: Sequence, received: Sequence },
}

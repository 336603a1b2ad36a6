use serde::{Deserialize, Serialize};

use crate::values::{Price, Quantity};

/// One price level of a book
///
/// An amount of zero means the level is absent: applying it removes the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub amount: Quantity,
    /// Number of resting orders, when the venue reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_count: Option<u32>,
}

impl PriceLevel {
    pub fn new(price: Price, amount: Quantity) -> Self {
        PriceLevel {
            price,
            amount,
            order_count: None,
        }
    }

    pub fn with_order_count(mut self, count: u32) -> Self {
        self.order_count = Some(count);
        self
    }

    pub fn is_removal(&self) -> bool {
        self.amount.is_zero()
    }
}

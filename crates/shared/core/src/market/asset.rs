use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset class a book belongs to
///
/// The same pair can trade as spot and as a perpetual swap on one exchange;
/// those are distinct books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Spot,
    Margin,
    PerpetualSwap,
    Futures,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Spot => "spot",
            AssetType::Margin => "margin",
            AssetType::PerpetualSwap => "perpetual_swap",
            AssetType::Futures => "futures",
        }
    }

    /// Derivative books carry per-level order counts on most venues
    pub fn is_derivative(&self) -> bool {
        matches!(self, AssetType::PerpetualSwap | AssetType::Futures)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

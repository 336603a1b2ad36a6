//! Market identity: which exchange, which pair, which asset class.

mod asset;
mod exchange;
mod key;
mod pair;

pub use asset::AssetType;
pub use exchange::ExchangeId;
pub use key::BookKey;
pub use pair::{Pair, PairParseError};

mod account;
mod connection;
mod frame;
mod level;
mod side;
mod subscription;
mod ticker;
mod trade;

pub use account::{AccountHoldings, Balance, SubAccount};
pub use connection::ConnectionState;
pub use frame::{AckOutcome, Frame};
pub use level::PriceLevel;
pub use side::{BookSide, Side};
pub use subscription::{Channel, Subscription, SubscriptionSpec, SubscriptionState};
pub use ticker::Ticker;
pub use trade::Trade;

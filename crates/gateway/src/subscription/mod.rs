//! Desired channels per exchange and their acknowledgement state.

mod registry;

pub use registry::{SubscriptionError, SubscriptionRegistry, SubscriptionUpdate};

//! Inbound frame routing
//!
//! Keyed frames are hashed onto a fixed set of lanes. A lane is one tokio
//! task that owns the [`Synchronizer`](crate::orderbook::Synchronizer) for
//! its keys, so all frames of a key are handled in arrival order while
//! distinct keys proceed in parallel.

mod dispatcher;
mod lane;
mod sharding;

pub use dispatcher::{MessageRouter, RouterConfig};
pub(crate) use dispatcher::RouterTargets;
pub use sharding::{HashStrategy, ShardingStrategy};

//! Hermes Ports
//!
//! Port definitions (traits) for the Hermes engine.
//! These define the boundaries between the engine and the per-exchange
//! adapters that speak each vendor's wire format.

mod clock;
mod codec;
mod error;
mod fetch;

pub use clock::Clock;
pub use codec::FrameCodec;
pub use error::{CodecError, FetchError};
pub use fetch::{AccountFetcher, SnapshotFetcher, TickerFetcher};

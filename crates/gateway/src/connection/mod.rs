//! Per-exchange connection lifecycle.
//!
//! [`ConnectionHandle`] owns one socket at a time. A supervisor task reads it,
//! enforces the response-check watchdog, and on any failure redials with
//! capped exponential backoff, re-authenticates and replays subscriptions
//! while holding the writer lock, so no caller's send can interleave with a
//! reconnect.

mod backoff;
mod manager;

pub use backoff::{Backoff, backoff_delay};
pub use manager::{ConnectionHandle, SubscriptionReplay};

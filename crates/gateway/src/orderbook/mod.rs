//! Order book synchronization
//!
//! Each tracked [`BookKey`](hermes_core::BookKey) runs a small state machine
//! (see [`SyncState`]) that reconciles a REST snapshot with the
//! sequence-numbered diff stream:
//!
//! ```text
//! Uninitialized -> AwaitingSnapshot -> Synced -> Resyncing -> AwaitingSnapshot ...
//! ```
//!
//! The [`Synchronizer`] owns the mutable books and is driven by exactly one
//! lane per key. Completed books are published into the [`BookStore`], which
//! readers query without ever seeing a partially applied update.

mod buffer;
mod scheduler;
mod store;
mod sync_state;
mod synchronizer;

pub use scheduler::{SnapshotOutcome, SnapshotRequest, SnapshotScheduler};
pub use store::{BookStore, BookView, NotSynced};
pub use sync_state::{ResyncReason, SyncSettings, SyncState};
pub use synchronizer::Synchronizer;

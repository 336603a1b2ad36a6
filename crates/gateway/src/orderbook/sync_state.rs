use chrono::TimeDelta;
use hermes_core::{BookError, Sequence};
use std::fmt;

use crate::config::OrderbookConfig;

/// Per-key synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    #[default]
    Uninitialized,
    /// Snapshot requested; diffs are buffered until it arrives
    AwaitingSnapshot,
    Synced,
    /// Book discarded; a fresh snapshot will be requested
    Resyncing,
}

impl SyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::AwaitingSnapshot => "awaiting_snapshot",
            SyncState::Synced => "synced",
            SyncState::Resyncing => "resyncing",
        };
        f.write_str(s)
    }
}

/// Why a synced book was thrown away
#[derive(Debug, Clone, PartialEq)]
pub enum ResyncReason {
    BufferOverflow { buffered: usize, limit: usize },
    /// A gap after `sequence` stayed open past the gap timeout
    GapTimeout { sequence: Sequence },
    /// The feed told us the book is no longer valid
    Invalidated(String),
    Verification(BookError),
    ConnectionLost,
    Requested,
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncReason::BufferOverflow { buffered, limit } => {
                write!(f, "buffer overflow ({buffered} > {limit})")
            }
            ResyncReason::GapTimeout { sequence } => write!(f, "gap after {sequence} timed out"),
            ResyncReason::Invalidated(reason) => write!(f, "invalidated: {reason}"),
            ResyncReason::Verification(e) => write!(f, "verification failed: {e}"),
            ResyncReason::ConnectionLost => f.write_str("connection lost"),
            ResyncReason::Requested => f.write_str("resync requested"),
        }
    }
}

/// Synchronization tunables for one book, taken from its exchange config
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Buffered out-of-sequence messages tolerated while synced
    pub buffer_limit: usize,
    /// Buffered messages kept while a snapshot is in flight; oldest dropped
    pub awaiting_buffer_limit: usize,
    pub sort_buffer: bool,
    pub verify: bool,
    pub gap_timeout: TimeDelta,
    pub snapshot_depth: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings::from(&OrderbookConfig::default())
    }
}

impl From<&OrderbookConfig> for SyncSettings {
    fn from(config: &OrderbookConfig) -> Self {
        SyncSettings {
            buffer_limit: config.buffer_limit,
            awaiting_buffer_limit: config.awaiting_buffer_limit,
            sort_buffer: config.sort_buffer,
            verify: config.verify,
            gap_timeout: TimeDelta::from_std(config.gap_timeout()).unwrap_or(TimeDelta::MAX),
            snapshot_depth: config.snapshot_depth,
        }
    }
}

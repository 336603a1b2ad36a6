use hermes_core::{BookDelta, BookError, BookKey, ExchangeId, OrderBook, Sequence, Timestamp};
use hermes_ports::{Clock, FetchError};
use std::collections::HashMap;
use std::sync::Arc;

use super::buffer::UpdateBuffer;
use super::scheduler::SnapshotRequest;
use super::store::{BookSlot, BookStore, BookView};
use super::sync_state::{ResyncReason, SyncSettings, SyncState};
use crate::events::{EventBus, StreamEvent};

struct BookEntry {
    state: SyncState,
    /// Epoch of the snapshot request in flight, if any
    epoch: u64,
    book: Option<OrderBook>,
    buffer: UpdateBuffer,
    /// When the current sequence gap was first seen, or last narrowed
    gap_since: Option<Timestamp>,
    settings: SyncSettings,
    slot: BookSlot,
}

/// What a diff did to a synced book
enum Step {
    Applied,
    Buffered,
    Stale,
    Resync(ResyncReason),
}

impl BookEntry {
    fn publish(&self, key: &BookKey) {
        let view = match (&self.state, &self.book) {
            (SyncState::Synced, Some(book)) => BookView::Synced(Arc::new(book.snapshot(key))),
            (state, _) => BookView::NotSynced(*state),
        };
        self.slot.store(Arc::new(view));
    }

    fn discard(&mut self) {
        self.book = None;
        self.buffer.clear();
        self.gap_since = None;
    }

    /// Hold a diff that arrived before the snapshot; drops the oldest on overflow
    fn hold(&mut self, key: &BookKey, delta: BookDelta) {
        self.buffer.push(delta);
        while self.buffer.len() > self.settings.awaiting_buffer_limit {
            if let Some(sequence) = self.buffer.drop_oldest() {
                tracing::debug!(%key, sequence, "awaiting buffer full, dropped oldest update");
            }
        }
    }

    fn apply_synced(&mut self, delta: BookDelta, now: Timestamp) -> Step {
        let Some(book) = self.book.as_mut() else {
            return Step::Resync(ResyncReason::Requested);
        };
        let current = book.sequence();

        if delta.sequence <= current {
            tracing::trace!(key = %delta.key, current, received = delta.sequence, "stale update dropped");
            return Step::Stale;
        }

        if delta.sequence > current + 1 {
            self.buffer.push(delta);
            if self.buffer.len() > self.settings.buffer_limit {
                return Step::Resync(ResyncReason::BufferOverflow {
                    buffered: self.buffer.len(),
                    limit: self.settings.buffer_limit,
                });
            }
            self.gap_since.get_or_insert(now);
            return Step::Buffered;
        }

        if let Err(e) = book.apply(delta.sequence, &delta.changes, delta.timestamp) {
            return Step::Resync(ResyncReason::Verification(e));
        }
        if let Err(e) = self.drain() {
            return Step::Resync(ResyncReason::Verification(e));
        }
        self.gap_since = (!self.buffer.is_empty()).then_some(now);
        Step::Applied
    }

    /// Replay buffered diffs that now follow the book's sequence
    fn drain(&mut self) -> Result<(), BookError> {
        let Some(book) = self.book.as_mut() else {
            return Ok(());
        };
        while let Some(ready) = self.buffer.take_next(book.sequence(), self.settings.sort_buffer) {
            book.apply(ready.sequence, &ready.changes, ready.timestamp)?;
        }
        Ok(())
    }
}

/// Snapshot/diff state machines for the books of one lane
///
/// Not thread-safe on purpose: every key is owned by exactly one lane, which
/// is the only caller. Snapshot requests produced by transitions are
/// collected with [`drain_snapshot_requests`](Self::drain_snapshot_requests).
pub struct Synchronizer {
    books: HashMap<BookKey, BookEntry>,
    store: BookStore,
    clock: Arc<dyn Clock>,
    events: EventBus,
    /// Keys that need a snapshot requested
    queued: Vec<BookKey>,
    /// Shared across keys so an epoch is never reused after untrack + track
    next_epoch: u64,
}

impl Synchronizer {
    pub fn new(store: BookStore, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            books: HashMap::new(),
            store,
            clock,
            events,
            queued: Vec::new(),
            next_epoch: 1,
        }
    }

    /// Start synchronizing `key`; no-op if it is already tracked
    pub fn track(&mut self, key: BookKey, settings: SyncSettings) -> bool {
        if self.books.contains_key(&key) {
            return false;
        }
        let entry = BookEntry {
            state: SyncState::Uninitialized,
            epoch: 0,
            book: None,
            buffer: UpdateBuffer::default(),
            gap_since: None,
            settings,
            slot: self.store.slot(&key),
        };
        entry.publish(&key);
        self.books.insert(key.clone(), entry);
        self.queued.push(key);
        true
    }

    /// Forget `key` and its published book
    pub fn untrack(&mut self, key: &BookKey) -> bool {
        let removed = self.books.remove(key).is_some();
        if removed {
            self.store.remove(key);
            tracing::debug!(%key, "book untracked");
        }
        removed
    }

    /// Feed one diff message; diffs for untracked keys are dropped
    pub fn apply_delta(&mut self, delta: BookDelta) {
        let now = self.clock.now();
        let key = delta.key.clone();
        let Some(entry) = self.books.get_mut(&key) else {
            tracing::trace!(%key, sequence = delta.sequence, "update for untracked book dropped");
            return;
        };

        match entry.state {
            SyncState::Uninitialized | SyncState::AwaitingSnapshot | SyncState::Resyncing => {
                entry.hold(&key, delta);
            }
            SyncState::Synced => match entry.apply_synced(delta, now) {
                Step::Applied => entry.publish(&key),
                Step::Buffered => {
                    tracing::debug!(%key, buffered = entry.buffer.len(), "update buffered behind gap");
                }
                Step::Stale => {}
                Step::Resync(reason) => self.resync(&key, reason),
            },
        }
    }

    /// Install a REST snapshot if it answers the key's current request
    pub fn apply_snapshot(&mut self, key: &BookKey, epoch: u64, book: OrderBook) {
        let now = self.clock.now();
        let Some(entry) = self.books.get_mut(key) else {
            tracing::debug!(%key, "snapshot for untracked book ignored");
            return;
        };
        if entry.state != SyncState::AwaitingSnapshot || entry.epoch != epoch {
            tracing::debug!(%key, epoch, current_epoch = entry.epoch, state = %entry.state, "stale snapshot ignored");
            return;
        }

        let book = book.with_verification(entry.settings.verify);
        if entry.settings.verify
            && let Err(e) = book.verify()
        {
            self.resync(key, ResyncReason::Verification(e));
            return;
        }

        let sequence = book.sequence();
        entry.buffer.discard_through(sequence);
        entry.book = Some(book);
        entry.state = SyncState::Synced;
        entry.gap_since = None;

        if let Err(e) = entry.drain() {
            self.resync(key, ResyncReason::Verification(e));
            return;
        }
        if entry.buffer.len() > entry.settings.buffer_limit {
            let reason = ResyncReason::BufferOverflow {
                buffered: entry.buffer.len(),
                limit: entry.settings.buffer_limit,
            };
            self.resync(key, reason);
            return;
        }
        if !entry.buffer.is_empty() {
            entry.gap_since = Some(now);
        }

        entry.publish(key);
        let synced_at = entry.book.as_ref().map_or(sequence, OrderBook::sequence);
        tracing::info!(%key, snapshot = sequence, sequence = synced_at, "order book synced");
        self.events.emit(StreamEvent::BookSynced {
            key: key.clone(),
            sequence: synced_at,
        });
    }

    /// Report a failed fetch; the key keeps awaiting until resynced
    pub fn snapshot_failed(&mut self, key: &BookKey, epoch: u64, error: FetchError) {
        let Some(entry) = self.books.get(key) else {
            return;
        };
        if entry.state != SyncState::AwaitingSnapshot || entry.epoch != epoch {
            return;
        }
        tracing::error!(%key, epoch, error = %error, "snapshot fetch failed");
        self.events.emit(StreamEvent::SnapshotFailed {
            key: key.clone(),
            error,
        });
    }

    /// The feed declared the book invalid; ignored unless synced
    pub fn invalidate(&mut self, key: &BookKey, reason: impl Into<String>) {
        if self.state(key) == Some(SyncState::Synced) {
            self.resync(key, ResyncReason::Invalidated(reason.into()));
        }
    }

    /// Resync every synced book of `exchange` after its connection dropped
    pub fn invalidate_exchange(&mut self, exchange: &ExchangeId) -> usize {
        let keys: Vec<_> = self
            .books
            .iter()
            .filter(|(key, entry)| &key.exchange == exchange && entry.state == SyncState::Synced)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.resync(key, ResyncReason::ConnectionLost);
        }
        keys.len()
    }

    /// Force a fresh snapshot for `key`
    pub fn request_resync(&mut self, key: &BookKey) -> bool {
        match self.state(key) {
            None | Some(SyncState::Uninitialized) => false,
            Some(_) => {
                self.resync(key, ResyncReason::Requested);
                true
            }
        }
    }

    /// Resync books whose gap stayed open past the gap timeout
    pub fn check_gaps(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<_> = self
            .books
            .iter()
            .filter_map(|(key, entry)| {
                let since = entry.gap_since?;
                let book = entry.book.as_ref()?;
                (entry.state == SyncState::Synced && now - since >= entry.settings.gap_timeout)
                    .then(|| (key.clone(), book.sequence()))
            })
            .collect();
        for (key, sequence) in &expired {
            self.resync(key, ResyncReason::GapTimeout { sequence: *sequence });
        }
        expired.len()
    }

    /// Snapshot requests owed for keys that need one
    ///
    /// Moves each such key to `AwaitingSnapshot` under a fresh epoch.
    pub fn drain_snapshot_requests(&mut self) -> Vec<SnapshotRequest> {
        let mut requests = Vec::new();
        for key in std::mem::take(&mut self.queued) {
            let Some(entry) = self.books.get_mut(&key) else {
                continue;
            };
            if !matches!(entry.state, SyncState::Uninitialized | SyncState::Resyncing) {
                continue;
            }
            entry.epoch = self.next_epoch;
            self.next_epoch += 1;
            entry.state = SyncState::AwaitingSnapshot;
            entry.publish(&key);
            tracing::debug!(%key, epoch = entry.epoch, "snapshot requested");
            requests.push(SnapshotRequest {
                epoch: entry.epoch,
                depth: entry.settings.snapshot_depth,
                key,
            });
        }
        requests
    }

    pub fn state(&self, key: &BookKey) -> Option<SyncState> {
        self.books.get(key).map(|entry| entry.state)
    }

    pub fn sequence(&self, key: &BookKey) -> Option<Sequence> {
        self.books.get(key)?.book.as_ref().map(OrderBook::sequence)
    }

    /// Buffered diff messages for `key`
    pub fn buffered(&self, key: &BookKey) -> usize {
        self.books.get(key).map_or(0, |entry| entry.buffer.len())
    }

    /// Current snapshot epoch for `key`
    pub fn epoch(&self, key: &BookKey) -> Option<u64> {
        self.books.get(key).map(|entry| entry.epoch)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BookKey> {
        self.books.keys()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    fn resync(&mut self, key: &BookKey, reason: ResyncReason) {
        let Some(entry) = self.books.get_mut(key) else {
            return;
        };
        entry.discard();
        entry.state = SyncState::Resyncing;
        entry.publish(key);
        self.queued.push(key.clone());
        tracing::warn!(%key, %reason, "order book resyncing");
        self.events.emit(StreamEvent::BookResyncing {
            key: key.clone(),
            reason,
        });
    }
}

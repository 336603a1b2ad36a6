use arc_swap::ArcSwap;
use dashmap::DashMap;
use hermes_core::{BookKey, BookSnapshot, ExchangeId};
use std::sync::Arc;
use thiserror::Error;

use super::SyncState;

/// What readers see for one key
#[derive(Debug, Clone, PartialEq)]
pub enum BookView {
    Synced(Arc<BookSnapshot>),
    NotSynced(SyncState),
}

impl BookView {
    pub fn state(&self) -> SyncState {
        match self {
            BookView::Synced(_) => SyncState::Synced,
            BookView::NotSynced(state) => *state,
        }
    }
}

/// Returned instead of a book that is not currently trustworthy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("order book {key} is not synced ({state})")]
pub struct NotSynced {
    pub key: BookKey,
    pub state: SyncState,
}

pub(crate) type BookSlot = Arc<ArcSwap<BookView>>;

/// Published books, one atomically swapped slot per key
///
/// Lanes write whole views; readers load the current one without locking
/// the writer. A key that was never tracked reads as `Uninitialized`.
#[derive(Clone, Default)]
pub struct BookStore {
    slots: Arc<DashMap<BookKey, BookSlot>>,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest fully applied book for `key`
    pub fn get(&self, key: &BookKey) -> Result<Arc<BookSnapshot>, NotSynced> {
        match self.view(key) {
            BookView::Synced(book) => Ok(book),
            BookView::NotSynced(state) => Err(NotSynced {
                key: key.clone(),
                state,
            }),
        }
    }

    pub fn view(&self, key: &BookKey) -> BookView {
        self.slots
            .get(key)
            .map(|slot| slot.load_full().as_ref().clone())
            .unwrap_or(BookView::NotSynced(SyncState::Uninitialized))
    }

    pub fn state(&self, key: &BookKey) -> SyncState {
        self.view(key).state()
    }

    pub fn keys(&self) -> Vec<BookKey> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn keys_for(&self, exchange: &ExchangeId) -> Vec<BookKey> {
        self.slots
            .iter()
            .filter(|entry| &entry.key().exchange == exchange)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot for `key`, created as `Uninitialized` if missing
    pub(crate) fn slot(&self, key: &BookKey) -> BookSlot {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(BookView::NotSynced(SyncState::Uninitialized))))
            .clone()
    }

    pub(crate) fn remove(&self, key: &BookKey) {
        self.slots.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.slots.clear();
    }
}

//! Engine events for adapters and upper layers
//!
//! Book self-healing and REST failures are reported here rather than as
//! errors: a reader of [`BookStore`](crate::orderbook::BookStore) only ever
//! sees a valid book or "not synced", while this stream explains why.

use hermes_core::{BookKey, ConnectionState, ExchangeId, Sequence, SubscriptionSpec, SubscriptionState};
use hermes_ports::FetchError;
use tokio::sync::broadcast;

use crate::orderbook::ResyncReason;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    BookSynced {
        key: BookKey,
        sequence: Sequence,
    },
    BookResyncing {
        key: BookKey,
        reason: ResyncReason,
    },
    /// REST snapshot fetch failed; the book stays awaiting until resynced
    SnapshotFailed {
        key: BookKey,
        error: FetchError,
    },
    /// `state` is `None` once the subscription is gone
    SubscriptionChanged {
        exchange: ExchangeId,
        spec: SubscriptionSpec,
        state: Option<SubscriptionState>,
    },
    ConnectionStateChanged {
        exchange: ExchangeId,
        state: ConnectionState,
    },
    FrameDropped {
        exchange: ExchangeId,
        kind: String,
        reason: String,
    },
}

/// Broadcast fan-out of [`StreamEvent`]s; emitting never blocks or fails
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn emit(&self, event: StreamEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}

use async_trait::async_trait;
use hermes_core::{ConnectionState, ExchangeId};
use hermes_ports::{AccountFetcher, FrameCodec, TickerFetcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ExchangeConfig;
use crate::connection::{ConnectionHandle, SubscriptionReplay};
use crate::error::TransportError;
use crate::events::{EventBus, StreamEvent};
use crate::router::MessageRouter;
use crate::subscription::{SubscriptionError, SubscriptionRegistry};
use crate::transport::FrameSink;

/// Live pieces of one registered exchange
pub(crate) struct ExchangeRuntime {
    pub config: ExchangeConfig,
    pub connection: ConnectionHandle,
    pub registry: Arc<SubscriptionRegistry>,
    pub tickers: Arc<dyn TickerFetcher>,
    pub accounts: Option<Arc<dyn AccountFetcher>>,
    pub cancel: CancellationToken,
    pub tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ExchangeRuntime {
    /// Stop background tasks and close the socket
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.connection.close().await;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        self.registry.clear();
    }
}

/// Replay hook run on every fresh socket
///
/// Books of the exchange are invalidated before the new socket delivers
/// anything, so no book silently spans two connections.
pub(crate) struct SessionReplay {
    pub exchange: ExchangeId,
    pub registry: Arc<SubscriptionRegistry>,
    pub router: Arc<MessageRouter>,
}

#[async_trait]
impl SubscriptionReplay for SessionReplay {
    async fn replay(
        &self,
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if self.router.invalidate_exchange(&self.exchange).await.is_err() {
            return Err(TransportError::Closed);
        }
        self.registry.replay(sink, cancel).await
    }
}

/// Decode raw socket text and route the frames
pub(crate) async fn pump_inbound(
    exchange: ExchangeId,
    mut inbound: mpsc::Receiver<String>,
    codec: Arc<dyn FrameCodec>,
    router: Arc<MessageRouter>,
    events: EventBus,
    cancel: CancellationToken,
) {
    loop {
        let text = tokio::select! {
            _ = cancel.cancelled() => return,
            text = inbound.recv() => match text {
                Some(text) => text,
                None => return,
            },
        };

        let frames = match codec.decode(&text) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(%exchange, error = %e, "undecodable message dropped");
                events.emit(StreamEvent::FrameDropped {
                    exchange: exchange.clone(),
                    kind: "malformed".to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        for frame in frames {
            if let Err(e) = router.dispatch(&exchange, frame).await {
                tracing::debug!(%exchange, error = %e, "router gone, inbound pump stopping");
                return;
            }
        }
    }
}

/// Report connection state changes; leaving Ready invalidates the books
pub(crate) async fn watch_connection(
    exchange: ExchangeId,
    mut states: watch::Receiver<ConnectionState>,
    router: Arc<MessageRouter>,
    events: EventBus,
    cancel: CancellationToken,
) {
    let mut previous = *states.borrow_and_update();
    events.emit(StreamEvent::ConnectionStateChanged {
        exchange: exchange.clone(),
        state: previous,
    });
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = states.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let state = *states.borrow_and_update();
        if state == previous {
            continue;
        }
        events.emit(StreamEvent::ConnectionStateChanged {
            exchange: exchange.clone(),
            state,
        });
        if previous.is_ready()
            && !state.is_ready()
            && router.invalidate_exchange(&exchange).await.is_err()
        {
            return;
        }
        previous = state;
    }
}

/// Settle unacked requests and resend stalled subscriptions
pub(crate) async fn maintain_subscriptions(
    registry: Arc<SubscriptionRegistry>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {}
        }
        registry.expire_pending(Instant::now());
        match registry.retry_pending(&cancel).await {
            Ok(_) => {}
            Err(SubscriptionError::Cancelled) => return,
            Err(e) => {
                tracing::debug!(exchange = %registry.exchange(), error = %e, "subscription retry failed");
            }
        }
    }
}

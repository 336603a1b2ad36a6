use async_trait::async_trait;
use hermes_core::{AckOutcome, ExchangeId, Subscription, SubscriptionSpec, SubscriptionState};
use hermes_ports::{CodecError, FrameCodec};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WebsocketConfig;
use crate::connection::{ConnectionHandle, SubscriptionReplay};
use crate::error::TransportError;
use crate::events::{EventBus, StreamEvent};
use crate::ratelimit::{EndpointClass, RateLimitError, RateLimiter};
use crate::transport::FrameSink;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("subscription request cancelled")]
    Cancelled,

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A state change caused by an ack, an expiry or a replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub spec: SubscriptionSpec,
    /// `None` when the subscription was removed
    pub state: Option<SubscriptionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Subscribe,
    Unsubscribe,
    /// Re-subscribe after reconnect
    Replay,
}

struct Request {
    kind: RequestKind,
    specs: Vec<SubscriptionSpec>,
    sent_at: Instant,
    _permit: Option<OwnedSemaphorePermit>,
}

struct Entry {
    state: SubscriptionState,
    /// Request awaiting an ack for this spec; `None` if nothing is on the wire
    request: Option<u64>,
    /// A send for this spec was cancelled or failed; picked up by retries
    stalled: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<SubscriptionSpec, Entry>,
    requests: HashMap<u64, Request>,
}

/// Tracks desired channels on one exchange connection and drives
/// (un)subscribe traffic
///
/// Specs go Pending -> Active on ack, or optimistically once the ack timeout
/// passes after a request was actually sent. A spec whose send was cancelled
/// stays Pending with nothing on the wire until it is retried or replayed.
/// At most `response_max_limit` requests may await an ack at once.
pub struct SubscriptionRegistry {
    exchange: ExchangeId,
    codec: Arc<dyn FrameCodec>,
    connection: ConnectionHandle,
    limiter: RateLimiter,
    config: WebsocketConfig,
    events: EventBus,
    state: Mutex<RegistryState>,
    in_flight: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(
        codec: Arc<dyn FrameCodec>,
        connection: ConnectionHandle,
        limiter: RateLimiter,
        config: WebsocketConfig,
        events: EventBus,
    ) -> Self {
        SubscriptionRegistry {
            exchange: connection.exchange().clone(),
            in_flight: Arc::new(Semaphore::new(config.response_max_limit)),
            codec,
            connection,
            limiter,
            config,
            events,
            state: Mutex::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Request `specs`; already Active or in-flight specs are skipped
    ///
    /// Returns the specs actually put on the wire. On cancellation or
    /// failure, specs not yet sent stay Pending.
    pub async fn subscribe(
        &self,
        specs: Vec<SubscriptionSpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionSpec>, SubscriptionError> {
        let wanted = {
            let mut state = self.state.lock();
            let mut wanted = Vec::new();
            for spec in specs {
                let entry = state.entries.entry(spec.clone()).or_insert(Entry {
                    state: SubscriptionState::Pending,
                    request: None,
                    stalled: false,
                });
                match (entry.state, entry.request) {
                    (SubscriptionState::Active, _) | (SubscriptionState::Pending, Some(_)) => {}
                    _ => {
                        entry.state = SubscriptionState::Pending;
                        entry.request = None;
                        if !wanted.contains(&spec) {
                            wanted.push(spec);
                        }
                    }
                }
            }
            wanted
        };

        for spec in &wanted {
            self.emit(spec, Some(SubscriptionState::Pending));
        }
        self.send_batches(RequestKind::Subscribe, &wanted, cancel)
            .await?;
        Ok(wanted)
    }

    /// Remove `specs`; unknown specs are ignored
    ///
    /// Specs with nothing on the wire are dropped at once; the rest go
    /// Unsubscribing until acked or expired.
    pub async fn unsubscribe(
        &self,
        specs: Vec<SubscriptionSpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionSpec>, SubscriptionError> {
        let (wire, dropped) = {
            let mut state = self.state.lock();
            let mut wire = Vec::new();
            let mut dropped = Vec::new();
            for spec in specs {
                let Some(entry) = state.entries.get_mut(&spec) else {
                    continue;
                };
                match (entry.state, entry.request) {
                    (SubscriptionState::Pending, None) => {
                        state.entries.remove(&spec);
                        dropped.push(spec);
                    }
                    (SubscriptionState::Unsubscribing, Some(_)) => {}
                    _ => {
                        entry.state = SubscriptionState::Unsubscribing;
                        entry.request = None;
                        if !wire.contains(&spec) {
                            wire.push(spec);
                        }
                    }
                }
            }
            (wire, dropped)
        };

        for spec in &dropped {
            self.emit(spec, None);
        }
        for spec in &wire {
            self.emit(spec, Some(SubscriptionState::Unsubscribing));
        }
        self.send_batches(RequestKind::Unsubscribe, &wire, cancel)
            .await?;
        Ok(wire)
    }

    /// Re-send specs whose earlier send was cancelled or failed
    ///
    /// Stalled Pending specs are subscribed again and stalled Unsubscribing
    /// specs are unsubscribed again. Specs with a request on the wire are
    /// left alone.
    pub async fn retry_pending(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionSpec>, SubscriptionError> {
        let (subscribes, unsubscribes) = {
            let state = self.state.lock();
            let mut subscribes = Vec::new();
            let mut unsubscribes = Vec::new();
            for (spec, entry) in state
                .entries
                .iter()
                .filter(|(_, e)| e.request.is_none() && e.stalled)
            {
                match entry.state {
                    SubscriptionState::Pending => subscribes.push(spec.clone()),
                    SubscriptionState::Unsubscribing => unsubscribes.push(spec.clone()),
                    SubscriptionState::Active => {}
                }
            }
            (subscribes, unsubscribes)
        };
        if subscribes.is_empty() && unsubscribes.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(
            exchange = %self.exchange,
            subscribes = subscribes.len(),
            unsubscribes = unsubscribes.len(),
            "retrying stalled requests"
        );
        self.send_batches(RequestKind::Subscribe, &subscribes, cancel)
            .await?;
        self.send_batches(RequestKind::Unsubscribe, &unsubscribes, cancel)
            .await?;
        Ok(subscribes.into_iter().chain(unsubscribes).collect())
    }

    /// Apply an exchange acknowledgement; unknown request ids are ignored
    pub fn handle_ack(&self, request_id: u64, outcome: &AckOutcome) -> Vec<SubscriptionUpdate> {
        let updates = {
            let mut state = self.state.lock();
            let Some(request) = state.requests.remove(&request_id) else {
                tracing::debug!(exchange = %self.exchange, request_id, "ack for unknown request");
                return Vec::new();
            };
            if let AckOutcome::Rejected(reason) = outcome {
                tracing::warn!(
                    exchange = %self.exchange,
                    request_id,
                    reason = %reason,
                    kind = ?request.kind,
                    "subscription request rejected"
                );
            }
            settle(&mut state, request_id, &request, outcome)
        };
        self.emit_all(&updates);
        updates
    }

    /// Settle requests whose ack never arrived within the ack timeout
    ///
    /// Unacked subscribes are activated optimistically; unacked
    /// unsubscribes are treated as done.
    pub fn expire_pending(&self, now: Instant) -> Vec<SubscriptionUpdate> {
        let timeout = self.config.subscription_ack_timeout();
        let updates = {
            let mut state = self.state.lock();
            let expired: Vec<u64> = state
                .requests
                .iter()
                .filter(|(_, r)| now.saturating_duration_since(r.sent_at) >= timeout)
                .map(|(id, _)| *id)
                .collect();

            let mut updates = Vec::new();
            for id in expired {
                if let Some(request) = state.requests.remove(&id) {
                    tracing::warn!(
                        exchange = %self.exchange,
                        request_id = id,
                        kind = ?request.kind,
                        "no ack received, assuming success"
                    );
                    updates.extend(settle(&mut state, id, &request, &AckOutcome::Ok));
                }
            }
            updates
        };
        self.emit_all(&updates);
        updates
    }

    pub fn state_of(&self, spec: &SubscriptionSpec) -> Option<SubscriptionState> {
        self.state.lock().entries.get(spec).map(|e| e.state)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(spec, e)| Subscription {
                spec: spec.clone(),
                state: e.state,
            })
            .collect()
    }

    pub fn active_specs(&self) -> Vec<SubscriptionSpec> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| e.state == SubscriptionState::Active)
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    /// Requests currently awaiting an ack
    pub fn in_flight(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Forget every subscription (connection teardown)
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        state.entries.clear();
    }

    async fn send_batches(
        &self,
        kind: RequestKind,
        specs: &[SubscriptionSpec],
        cancel: &CancellationToken,
    ) -> Result<(), SubscriptionError> {
        let result = self.send_each_batch(kind, specs, cancel).await;
        if result.is_err() {
            let mut state = self.state.lock();
            for spec in specs {
                if let Some(entry) = state.entries.get_mut(spec)
                    && entry.request.is_none()
                {
                    entry.stalled = true;
                }
            }
        }
        result
    }

    async fn send_each_batch(
        &self,
        kind: RequestKind,
        specs: &[SubscriptionSpec],
        cancel: &CancellationToken,
    ) -> Result<(), SubscriptionError> {
        let class = EndpointClass::subscribe(&self.exchange);
        for batch in specs.chunks(self.config.subscription_batch_size.max(1)) {
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Err(SubscriptionError::Cancelled),
                permit = Arc::clone(&self.in_flight).acquire_owned() => {
                    permit.map_err(|_| TransportError::Closed)?
                }
            };
            match self.limiter.acquire(&class, 1, cancel).await {
                Ok(()) => {}
                Err(RateLimitError::Cancelled(_)) => return Err(SubscriptionError::Cancelled),
                Err(e) => return Err(e.into()),
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let text = match kind {
                RequestKind::Unsubscribe => self.codec.encode_unsubscribe(id, batch)?,
                RequestKind::Subscribe | RequestKind::Replay => {
                    self.codec.encode_subscribe(id, batch)?
                }
            };

            // Record before sending so an immediate ack finds the request
            self.record(id, kind, batch, Some(permit));
            if let Err(e) = self.connection.send(text, cancel).await {
                self.abandon(id);
                return Err(match e {
                    TransportError::Cancelled => SubscriptionError::Cancelled,
                    other => other.into(),
                });
            }
            tracing::debug!(exchange = %self.exchange, request_id = id, ?kind, specs = batch.len(), "request sent");
        }
        Ok(())
    }

    fn record(
        &self,
        id: u64,
        kind: RequestKind,
        specs: &[SubscriptionSpec],
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let mut state = self.state.lock();
        let expected = match kind {
            RequestKind::Unsubscribe => SubscriptionState::Unsubscribing,
            RequestKind::Subscribe => SubscriptionState::Pending,
            RequestKind::Replay => SubscriptionState::Active,
        };
        for spec in specs {
            if let Some(entry) = state.entries.get_mut(spec)
                && (entry.state == expected || kind == RequestKind::Replay)
            {
                entry.request = Some(id);
                entry.stalled = false;
            }
        }
        state.requests.insert(
            id,
            Request {
                kind,
                specs: specs.to_vec(),
                sent_at: Instant::now(),
                _permit: permit,
            },
        );
    }

    /// Undo `record` after a failed send; specs keep their state
    fn abandon(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(request) = state.requests.remove(&id) {
            for spec in &request.specs {
                if let Some(entry) = state.entries.get_mut(spec)
                    && entry.request == Some(id)
                {
                    entry.request = None;
                }
            }
        }
    }

    fn emit(&self, spec: &SubscriptionSpec, state: Option<SubscriptionState>) {
        self.events.emit(StreamEvent::SubscriptionChanged {
            exchange: self.exchange.clone(),
            spec: spec.clone(),
            state,
        });
    }

    fn emit_all(&self, updates: &[SubscriptionUpdate]) {
        for update in updates {
            self.emit(&update.spec, update.state);
        }
    }
}

/// Resolve the specs of a finished request
fn settle(
    state: &mut RegistryState,
    id: u64,
    request: &Request,
    outcome: &AckOutcome,
) -> Vec<SubscriptionUpdate> {
    let accepted = matches!(outcome, AckOutcome::Ok);
    let mut updates = Vec::new();
    for spec in &request.specs {
        let Some(entry) = state.entries.get_mut(spec) else {
            continue;
        };
        // A newer request owns this spec
        if entry.request != Some(id) {
            continue;
        }
        entry.request = None;

        let next = match (request.kind, entry.state, accepted) {
            (RequestKind::Subscribe, SubscriptionState::Pending, true) => {
                Some(SubscriptionState::Active)
            }
            (RequestKind::Replay, SubscriptionState::Pending | SubscriptionState::Active, true) => {
                Some(SubscriptionState::Active)
            }
            (RequestKind::Subscribe | RequestKind::Replay, _, false) => None,
            (RequestKind::Unsubscribe, SubscriptionState::Unsubscribing, true) => None,
            (RequestKind::Unsubscribe, SubscriptionState::Unsubscribing, false) => {
                Some(SubscriptionState::Active)
            }
            (_, current, _) => Some(current),
        };

        match next {
            Some(next) if next == entry.state => {}
            Some(next) => {
                entry.state = next;
                updates.push(SubscriptionUpdate {
                    spec: spec.clone(),
                    state: Some(next),
                });
            }
            None => {
                state.entries.remove(spec);
                updates.push(SubscriptionUpdate {
                    spec: spec.clone(),
                    state: None,
                });
            }
        }
    }
    updates
}

#[async_trait]
impl SubscriptionReplay for SubscriptionRegistry {
    /// Re-subscribe everything that is Active or Pending on a fresh socket
    ///
    /// Old requests died with the old socket; Unsubscribing specs are simply
    /// dropped since the new socket never carried them.
    async fn replay(
        &self,
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let (specs, dropped) = {
            let mut state = self.state.lock();
            state.requests.clear();
            let mut dropped = Vec::new();
            state.entries.retain(|spec, entry| {
                entry.request = None;
                if entry.state == SubscriptionState::Unsubscribing {
                    dropped.push(spec.clone());
                    false
                } else {
                    true
                }
            });
            let specs: Vec<_> = state.entries.keys().cloned().collect();
            (specs, dropped)
        };
        for spec in &dropped {
            self.emit(spec, None);
        }
        if specs.is_empty() {
            return Ok(());
        }

        tracing::info!(exchange = %self.exchange, count = specs.len(), "replaying subscriptions");
        let class = EndpointClass::subscribe(&self.exchange);
        for batch in specs.chunks(self.config.subscription_batch_size.max(1)) {
            match self.limiter.acquire(&class, 1, cancel).await {
                Ok(()) => {}
                Err(RateLimitError::Cancelled(_)) => return Err(TransportError::Cancelled),
                Err(e) => {
                    tracing::warn!(exchange = %self.exchange, error = %e, "replaying without rate limit");
                }
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let text = match self.codec.encode_subscribe(id, batch) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(exchange = %self.exchange, error = %e, "cannot encode replay batch");
                    continue;
                }
            };
            let permit = Arc::clone(&self.in_flight).try_acquire_owned().ok();
            self.record(id, RequestKind::Replay, batch, permit);
            if let Err(e) = sink.send(text).await {
                self.abandon(id);
                return Err(e);
            }
        }
        Ok(())
    }
}

use dashmap::DashMap;
use hermes_core::{BookKey, ExchangeId, Frame};
use hermes_ports::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lane::{Lane, LaneCommand};
use super::sharding::{HashStrategy, ShardingStrategy};
use crate::cache::{AccountCache, TickerCache};
use crate::config::GlobalConfig;
use crate::error::{GatewayError, Result};
use crate::events::{EventBus, StreamEvent};
use crate::orderbook::{BookStore, SnapshotOutcome, SnapshotScheduler, SyncSettings, Synchronizer};
use crate::subscription::SubscriptionRegistry;
use crate::trades::TradeBuffer;

/// Lane layout
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub lanes: usize,
    pub lane_capacity: usize,
    pub gap_check_interval: Duration,
}

impl From<&GlobalConfig> for RouterConfig {
    fn from(config: &GlobalConfig) -> Self {
        RouterConfig {
            lanes: config.lanes,
            lane_capacity: config.lane_capacity,
            gap_check_interval: config.gap_check_interval(),
        }
    }
}

/// Shared state the router feeds
#[derive(Clone)]
pub(crate) struct RouterTargets {
    pub store: BookStore,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub trades: Arc<TradeBuffer>,
    pub tickers: Arc<TickerCache>,
    pub accounts: Arc<AccountCache>,
    pub scheduler: SnapshotScheduler,
}

/// Demultiplexes decoded frames onto lanes and shared caches
///
/// Book, invalidate, trade and ticker frames go to the lane of their key.
/// Acks go to the owning exchange's registry, account frames to the account
/// cache. Anything else is logged, reported as
/// [`StreamEvent::FrameDropped`] and skipped.
pub struct MessageRouter {
    lanes: Vec<mpsc::Sender<LaneCommand>>,
    strategy: Arc<dyn ShardingStrategy>,
    registries: DashMap<ExchangeId, Arc<SubscriptionRegistry>>,
    accounts: Arc<AccountCache>,
    events: EventBus,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageRouter {
    pub(crate) fn spawn(config: RouterConfig, targets: RouterTargets) -> Self {
        Self::with_strategy(config, targets, Arc::new(HashStrategy))
    }

    pub(crate) fn with_strategy(
        config: RouterConfig,
        targets: RouterTargets,
        strategy: Arc<dyn ShardingStrategy>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let lane_count = config.lanes.max(1);
        let mut lanes = Vec::with_capacity(lane_count);
        let mut tasks = Vec::with_capacity(lane_count + 2);

        for id in 0..lane_count {
            let (tx, rx) = mpsc::channel(config.lane_capacity.max(1));
            let lane = Lane {
                id,
                sync: Synchronizer::new(
                    targets.store.clone(),
                    Arc::clone(&targets.clock),
                    targets.events.clone(),
                ),
                trades: Arc::clone(&targets.trades),
                tickers: Arc::clone(&targets.tickers),
                scheduler: targets.scheduler.clone(),
            };
            tasks.push(tokio::spawn(lane.run(
                rx,
                config.gap_check_interval,
                shutdown.child_token(),
            )));
            lanes.push(tx);
        }

        // Snapshot results go back to the lane that owns the key
        let (outcome_tx, outcome_rx) = mpsc::channel(config.lane_capacity.max(1));
        tasks.push(targets.scheduler.spawn(outcome_tx));
        tasks.push(tokio::spawn(forward_outcomes(
            outcome_rx,
            lanes.clone(),
            Arc::clone(&strategy),
            shutdown.child_token(),
        )));

        tracing::info!(lanes = lane_count, "message router started");
        MessageRouter {
            lanes,
            strategy,
            registries: DashMap::new(),
            accounts: targets.accounts,
            events: targets.events,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    pub(crate) fn register(&self, registry: Arc<SubscriptionRegistry>) {
        self.registries.insert(registry.exchange().clone(), registry);
    }

    pub(crate) fn unregister(&self, exchange: &ExchangeId) {
        self.registries.remove(exchange);
    }

    /// Route one frame received from `exchange`
    pub async fn dispatch(&self, exchange: &ExchangeId, frame: Frame) -> Result<()> {
        if let Some(key) = frame.key() {
            let lane = self.lane(key);
            return self.send(lane, LaneCommand::Frame(frame)).await;
        }

        match frame {
            Frame::Ack {
                exchange: acked_by,
                request_id,
                outcome,
            } => match self.registries.get(&acked_by).map(|r| Arc::clone(r.value())) {
                Some(registry) => {
                    registry.handle_ack(request_id, &outcome);
                }
                None => self.dropped(exchange, "ack", format!("no registry for {acked_by}")),
            },
            Frame::Account(holdings) => self.accounts.process(holdings),
            Frame::Heartbeat => {}
            Frame::Unrecognized { channel } => {
                self.dropped(exchange, "unrecognized", format!("unknown channel {channel}"));
            }
            other => self.dropped(exchange, other.kind(), "unroutable".to_string()),
        }
        Ok(())
    }

    pub(crate) async fn track(&self, key: BookKey, settings: SyncSettings) -> Result<()> {
        let lane = self.lane(&key);
        self.send(lane, LaneCommand::Track { key, settings }).await
    }

    pub(crate) async fn untrack(&self, key: BookKey) -> Result<()> {
        let lane = self.lane(&key);
        self.send(lane, LaneCommand::Untrack(key)).await
    }

    pub(crate) async fn resync(&self, key: BookKey) -> Result<()> {
        let lane = self.lane(&key);
        self.send(lane, LaneCommand::Resync(key)).await
    }

    /// Resync every synced book of `exchange`, on all lanes
    pub(crate) async fn invalidate_exchange(&self, exchange: &ExchangeId) -> Result<()> {
        for lane in 0..self.lanes.len() {
            self.send(lane, LaneCommand::InvalidateExchange(exchange.clone()))
                .await?;
        }
        Ok(())
    }

    /// Resolves once every lane has handled everything sent before this call
    pub async fn sync_point(&self) -> Result<()> {
        let mut waits = Vec::with_capacity(self.lanes.len());
        for lane in 0..self.lanes.len() {
            let (tx, rx) = oneshot::channel();
            self.send(lane, LaneCommand::Barrier(tx)).await?;
            waits.push(rx);
        }
        for rx in waits {
            rx.await.map_err(|_| GatewayError::Shutdown)?;
        }
        Ok(())
    }

    /// Stop lanes and the snapshot pipeline
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            // The scheduler loop stops through its own token
            task.abort();
            let _ = task.await;
        }
        self.registries.clear();
        tracing::info!("message router stopped");
    }

    fn lane(&self, key: &BookKey) -> usize {
        self.strategy.lane_for(key, self.lanes.len())
    }

    async fn send(&self, lane: usize, command: LaneCommand) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        self.lanes[lane]
            .send(command)
            .await
            .map_err(|_| GatewayError::Shutdown)
    }

    fn dropped(&self, exchange: &ExchangeId, kind: &str, reason: String) {
        tracing::warn!(%exchange, kind, %reason, "frame dropped");
        self.events.emit(StreamEvent::FrameDropped {
            exchange: exchange.clone(),
            kind: kind.to_string(),
            reason,
        });
    }
}

async fn forward_outcomes(
    mut outcomes: mpsc::Receiver<SnapshotOutcome>,
    lanes: Vec<mpsc::Sender<LaneCommand>>,
    strategy: Arc<dyn ShardingStrategy>,
    shutdown: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return,
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => outcome,
                None => return,
            },
        };
        let lane = strategy.lane_for(&outcome.key, lanes.len());
        if lanes[lane].send(LaneCommand::Snapshot(outcome)).await.is_err() {
            return;
        }
    }
}

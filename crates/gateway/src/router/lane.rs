use hermes_core::{BookKey, ExchangeId, Frame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::TickerCache;
use crate::orderbook::{SnapshotOutcome, SnapshotScheduler, SyncSettings, Synchronizer};
use crate::trades::TradeBuffer;

pub(crate) enum LaneCommand {
    /// A keyed frame (book diff, invalidate, trade, ticker)
    Frame(Frame),
    Track { key: BookKey, settings: SyncSettings },
    Untrack(BookKey),
    Resync(BookKey),
    InvalidateExchange(ExchangeId),
    Snapshot(SnapshotOutcome),
    /// Answered once every earlier command has been handled
    Barrier(oneshot::Sender<()>),
}

/// One processing lane; owns the books hashed onto it
pub(crate) struct Lane {
    pub id: usize,
    pub sync: Synchronizer,
    pub trades: Arc<TradeBuffer>,
    pub tickers: Arc<TickerCache>,
    pub scheduler: SnapshotScheduler,
}

impl Lane {
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<LaneCommand>,
        gap_check_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut gap_check = tokio::time::interval(gap_check_interval);
        gap_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(lane = self.id, "lane started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = gap_check.tick() => {
                    let expired = self.sync.check_gaps();
                    if expired > 0 {
                        tracing::debug!(lane = self.id, expired, "gap timeouts");
                    }
                }
            }
            for request in self.sync.drain_snapshot_requests() {
                self.scheduler.submit(request);
            }
        }
        tracing::debug!(lane = self.id, books = self.sync.len(), "lane stopped");
    }

    fn handle(&mut self, command: LaneCommand) {
        match command {
            LaneCommand::Frame(frame) => self.handle_frame(frame),
            LaneCommand::Track { key, settings } => {
                self.sync.track(key, settings);
            }
            LaneCommand::Untrack(key) => {
                self.sync.untrack(&key);
            }
            LaneCommand::Resync(key) => {
                self.sync.request_resync(&key);
            }
            LaneCommand::InvalidateExchange(exchange) => {
                let invalidated = self.sync.invalidate_exchange(&exchange);
                if invalidated > 0 {
                    tracing::debug!(lane = self.id, %exchange, invalidated, "books invalidated");
                }
            }
            LaneCommand::Snapshot(outcome) => match outcome.result {
                Ok(book) => self.sync.apply_snapshot(&outcome.key, outcome.epoch, book),
                Err(error) => self.sync.snapshot_failed(&outcome.key, outcome.epoch, error),
            },
            LaneCommand::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Book(delta) => self.sync.apply_delta(delta),
            Frame::Invalidate { key, reason } => self.sync.invalidate(&key, reason),
            Frame::Trade(trade) => {
                self.trades.add(trade);
            }
            Frame::Ticker(ticker) => self.tickers.process(ticker),
            other => {
                tracing::debug!(lane = self.id, kind = other.kind(), "unkeyed frame reached a lane");
            }
        }
    }
}

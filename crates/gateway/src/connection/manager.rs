use async_trait::async_trait;
use hermes_core::{ConnectionState, ExchangeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use crate::config::{ExchangeConfig, ReconnectConfig, WebsocketConfig};
use crate::error::TransportError;
use crate::transport::{Authenticator, Dialer, FrameSink, FrameSource, Inbound};

/// Re-sends subscriptions on a fresh socket
///
/// Called by the supervisor with the writer lock held, so implementations
/// must write through `sink` and never through [`ConnectionHandle::send`].
#[async_trait]
pub trait SubscriptionReplay: Send + Sync {
    async fn replay(
        &self,
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;
}

/// Everything needed to (re)establish a socket
struct Session {
    dialer: Arc<dyn Dialer>,
    replay: Arc<dyn SubscriptionReplay>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

enum Disconnect {
    Watchdog(Duration),
    PeerClosed,
    Error(TransportError),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Watchdog(timeout) => write!(f, "no inbound data for {timeout:?}"),
            Disconnect::PeerClosed => f.write_str("closed by peer"),
            Disconnect::Error(e) => write!(f, "{e}"),
        }
    }
}

struct Inner {
    exchange: ExchangeId,
    url: String,
    websocket: WebsocketConfig,
    reconnect: ReconnectConfig,
    /// Write half; `None` while disconnected. Held across reconnect + replay.
    writer: Mutex<Option<Box<dyn FrameSink>>>,
    state: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::Sender<String>,
    inbound_rx: parking_lot::Mutex<Option<mpsc::Receiver<String>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

/// Handle to one supervised exchange connection
///
/// Cloning is cheap; clones share the socket. Inbound messages from every
/// socket incarnation arrive on the single receiver returned by
/// [`take_inbound`](Self::take_inbound).
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub fn new(
        exchange: ExchangeId,
        url: impl Into<String>,
        websocket: WebsocketConfig,
        reconnect: ReconnectConfig,
        inbound_capacity: usize,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionHandle {
            inner: Arc::new(Inner {
                exchange,
                url: url.into(),
                websocket,
                reconnect,
                writer: Mutex::new(None),
                state,
                inbound_tx,
                inbound_rx: parking_lot::Mutex::new(Some(inbound_rx)),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn from_config(config: &ExchangeConfig, inbound_capacity: usize) -> Self {
        Self::new(
            config.id.clone(),
            config.ws_url.clone(),
            config.websocket.clone(),
            config.reconnect.clone(),
            inbound_capacity,
        )
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.inner.exchange
    }

    /// Dial, authenticate and replay once; on success hand the socket to a
    /// supervisor task that keeps it alive until [`close`](Self::close)
    pub async fn connect(
        &self,
        dialer: Arc<dyn Dialer>,
        replay: Arc<dyn SubscriptionReplay>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<(), TransportError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Connect(format!(
                "{} is already connected",
                self.inner.exchange
            )));
        }

        let session = Session {
            dialer,
            replay,
            authenticator,
        };
        self.inner.set_state(ConnectionState::Connecting);
        let source = {
            let mut writer = self.inner.writer.lock().await;
            match self.inner.establish(&session, &mut writer).await {
                Ok(source) => source,
                Err(e) => {
                    self.inner.set_state(ConnectionState::Disconnected);
                    self.inner.started.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.supervise(session, source).await });
        Ok(())
    }

    /// Send one text message, waiting for a usable socket if necessary
    ///
    /// Waits out reconnects; fails with `Cancelled` if `cancel` fires first
    /// and `Closed` once the connection is shut down.
    pub async fn send(&self, text: String, cancel: &CancellationToken) -> Result<(), TransportError> {
        let mut state_rx = self.inner.state.subscribe();
        loop {
            {
                let mut writer = tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    _ = self.inner.shutdown.cancelled() => return Err(TransportError::Closed),
                    guard = self.inner.writer.lock() => guard,
                };
                if let Some(sink) = writer.as_mut() {
                    return sink.send(text).await;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = self.inner.shutdown.cancelled() => return Err(TransportError::Closed),
                ready = wait_ready(&mut state_rx) => ready?,
            }
        }
    }

    /// Receiver of raw inbound messages; `None` after the first call
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<String>> {
        self.inner.inbound_rx.lock().take()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once the connection is closed for good
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Stop supervising and close the socket; pending sends fail with `Closed`
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let mut writer = self.inner.writer.lock().await;
        if let Some(mut sink) = writer.take()
            && let Err(e) = sink.close().await
        {
            tracing::debug!(exchange = %self.inner.exchange, error = %e, "error closing socket");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }
}

async fn wait_ready(rx: &mut watch::Receiver<ConnectionState>) -> Result<(), TransportError> {
    loop {
        let ready = rx.borrow_and_update().is_ready();
        if ready {
            return Ok(());
        }
        rx.changed().await.map_err(|_| TransportError::Closed)?;
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(exchange = %self.exchange, from = %previous, to = %state, "connection state");
        }
    }

    /// Dial, authenticate, replay; installs the new sink into `writer`
    async fn establish(
        &self,
        session: &Session,
        writer: &mut Option<Box<dyn FrameSink>>,
    ) -> Result<Box<dyn FrameSource>, TransportError> {
        let (mut sink, source) = session.dialer.dial(&self.url).await?;
        self.set_state(ConnectionState::Connected);

        if let Some(auth) = &session.authenticator {
            self.set_state(ConnectionState::Authenticating);
            auth.authenticate(sink.as_mut()).await?;
        }

        session.replay.replay(sink.as_mut(), &self.shutdown).await?;

        *writer = Some(sink);
        self.set_state(ConnectionState::Ready);
        Ok(source)
    }

    async fn supervise(self: Arc<Self>, session: Session, mut source: Box<dyn FrameSource>) {
        let mut backoff = Backoff::new(self.reconnect.clone());
        loop {
            let Some(reason) = self.read_until_disconnect(source.as_mut()).await else {
                return;
            };
            tracing::warn!(exchange = %self.exchange, %reason, "connection lost, reconnecting");
            self.set_state(ConnectionState::Reconnecting);

            let mut writer = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                guard = self.writer.lock() => guard,
            };
            if let Some(mut old) = writer.take()
                && let Err(e) = old.close().await
            {
                tracing::debug!(exchange = %self.exchange, error = %e, "error closing dropped socket");
            }

            backoff.reset();
            source = loop {
                if backoff.exhausted() {
                    tracing::error!(
                        exchange = %self.exchange,
                        attempts = backoff.attempts(),
                        "giving up reconnecting"
                    );
                    self.shutdown.cancel();
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }

                let delay = backoff.next_delay();
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                let attempt = tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    result = self.establish(&session, &mut writer) => result,
                };
                match attempt {
                    Ok(source) => {
                        tracing::info!(
                            exchange = %self.exchange,
                            attempts = backoff.attempts(),
                            "reconnected"
                        );
                        break source;
                    }
                    Err(e) => {
                        tracing::warn!(
                            exchange = %self.exchange,
                            attempt = backoff.attempts(),
                            error = %e,
                            "reconnect attempt failed"
                        );
                        *writer = None;
                        self.set_state(ConnectionState::Reconnecting);
                    }
                }
            };
        }
    }

    /// Forward inbound text until the socket fails; `None` on shutdown
    async fn read_until_disconnect(&self, source: &mut dyn FrameSource) -> Option<Disconnect> {
        let watchdog = self.websocket.response_check_timeout();
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                next = tokio::time::timeout(watchdog, source.next()) => next,
            };
            match next {
                Err(_) => return Some(Disconnect::Watchdog(watchdog)),
                Ok(None) => return Some(Disconnect::PeerClosed),
                Ok(Some(Err(e))) => return Some(Disconnect::Error(e)),
                Ok(Some(Ok(Inbound::Heartbeat))) => {
                    tracing::trace!(exchange = %self.exchange, "heartbeat");
                }
                Ok(Some(Ok(Inbound::Text(text)))) => {
                    let forwarded = tokio::select! {
                        _ = self.shutdown.cancelled() => return None,
                        sent = self.inbound_tx.send(text) => sent,
                    };
                    if forwarded.is_err() {
                        tracing::trace!(exchange = %self.exchange, "inbound receiver dropped");
                    }
                }
            }
        }
    }
}

//! In-process transport for single-process tests
//!
//! [`ChannelDialer`] hands out sockets backed by tokio channels. The matching
//! [`ChannelServer`] plays the exchange: it accepts each dial as a
//! [`ServerConnection`] that can push messages, read what the client sent,
//! and drop the connection. Dials can be refused to exercise backoff.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::{Dialer, FrameSink, FrameSource, Inbound, SocketPair};
use crate::error::TransportError;

#[derive(Default)]
struct DialCounters {
    dials: AtomicUsize,
    refuse: AtomicUsize,
}

/// Client side: dials into the paired [`ChannelServer`]
#[derive(Clone)]
pub struct ChannelDialer {
    accept_tx: mpsc::UnboundedSender<ServerConnection>,
    counters: Arc<DialCounters>,
}

impl ChannelDialer {
    /// Create a dialer/server pair
    pub fn pair() -> (Self, ChannelServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(DialCounters::default());
        (
            ChannelDialer {
                accept_tx,
                counters: Arc::clone(&counters),
            },
            ChannelServer {
                accept_rx,
                counters,
            },
        )
    }
}

#[async_trait]
impl Dialer for ChannelDialer {
    async fn dial(&self, url: &str) -> Result<SocketPair, TransportError> {
        self.counters.dials.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .counters
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect(format!("{url}: connection refused")));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        self.accept_tx
            .send(ServerConnection {
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::Connect(format!("{url}: no server listening")))?;

        Ok((
            Box::new(ChannelSink {
                tx: Some(client_tx),
            }),
            Box::new(ChannelSource { rx: client_rx }),
        ))
    }
}

/// Exchange side of the in-process transport
pub struct ChannelServer {
    accept_rx: mpsc::UnboundedReceiver<ServerConnection>,
    counters: Arc<DialCounters>,
}

impl ChannelServer {
    /// Wait for the next successful dial
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.recv().await
    }

    /// Refuse the next `n` dial attempts
    pub fn refuse_next(&self, n: usize) {
        self.counters.refuse.store(n, Ordering::SeqCst);
    }

    /// Dial attempts seen so far, refused ones included
    pub fn dials(&self) -> usize {
        self.counters.dials.load(Ordering::SeqCst)
    }
}

/// One accepted socket, seen from the exchange
///
/// Dropping it (or calling [`disconnect`](Self::disconnect)) closes the
/// client's read half.
pub struct ServerConnection {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerConnection {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Inbound::Text(text.into())).is_ok()
    }

    pub fn heartbeat(&self) -> bool {
        self.to_client.send(Inbound::Heartbeat).is_ok()
    }

    /// Next message the client sent; `None` once the client closed
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    pub fn disconnect(self) {}
}

struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text)
            .map_err(|_| TransportError::Send("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

//! Transport abstraction layer
//!
//! A [`Dialer`] opens a text-message socket and hands back its two halves.
//! The connection manager only ever talks to these traits, so the same
//! supervisor drives a real WebSocket ([`websocket::TungsteniteDialer`]) or an
//! in-process pair ([`channel::ChannelDialer`]) in tests.

pub mod channel;
pub mod websocket;

use crate::error::TransportError;
use async_trait::async_trait;

/// One inbound unit from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Protocol-level keepalive (ping/pong); proves liveness, carries no data
    Heartbeat,
}

/// Write half of a socket
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a socket
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound unit; `None` once the peer has closed
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>>;
}

pub type SocketPair = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens sockets
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<SocketPair, TransportError>;
}

/// Login handshake run on every fresh socket before subscriptions are replayed
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, sink: &mut dyn FrameSink) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ensure traits are object-safe
    fn _assert_sink_object_safe(_: &mut dyn FrameSink) {}
    fn _assert_source_object_safe(_: &mut dyn FrameSource) {}
    fn _assert_dialer_object_safe(_: &dyn Dialer) {}
    fn _assert_authenticator_object_safe(_: &dyn Authenticator) {}
}

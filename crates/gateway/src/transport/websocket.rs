//! WebSocket transport on tokio-tungstenite

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::{Dialer, FrameSink, FrameSource, Inbound, SocketPair};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials real WebSocket endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<SocketPair, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (write, read) = ws_stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>> {
        loop {
            let msg = match self.read.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };
            return match msg {
                Message::Text(text) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(Inbound::Text(text))),
                    Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
                },
                // tungstenite queues the pong reply itself
                Message::Ping(_) | Message::Pong(_) => Some(Ok(Inbound::Heartbeat)),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "peer closed websocket");
                    None
                }
                Message::Frame(_) => continue,
            };
        }
    }
}

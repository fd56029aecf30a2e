//! Transport seam for the client session.
//!
//! A connection is split into a sink and a stream so the session can wait on
//! inbound frames while writing heartbeats and caller messages.

use crate::error::SessionError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: String) -> Result<(), SessionError>;
    async fn close(&mut self);
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame; `None` once the peer has closed
    async fn next_frame(&mut self) -> Option<Result<String, SessionError>>;
}

pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Something that can open connections to the server
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, SessionError>;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Connection, SessionError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (write, read) = socket.split();

        Ok(Connection {
            sink: Box::new(WsSink(write)),
            stream: Box::new(WsStream(read)),
        })
    }
}

struct WsSink(SplitSink<Socket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| SessionError::TransportClosed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

struct WsStream(SplitStream<Socket>);

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String, SessionError>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Server closed the socket");
                    return None;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary is unused
                }
                Some(Err(e)) => return Some(Err(SessionError::TransportClosed(e.to_string()))),
                None => return None,
            }
        }
    }
}

//! Transport abstraction and the WebSocket implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One physical connection to an exchange.
#[async_trait]
pub trait Transport: Send {
    /// Open (or reopen) the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Send one encoded frame.
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Receive the next frame. `Ok(None)` means a control frame that was
    /// handled internally; `Err` means the connection is gone.
    async fn recv(&mut self) -> Result<Option<Bytes>>;

    async fn close(&mut self);
}

/// Builds a fresh transport for each connection handle the pool creates.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Box<dyn Transport> {
        (self)()
    }
}

/// WebSocket transport over tokio-tungstenite
pub struct WsTransport {
    endpoint: String,
    stream: Option<WsStream>,
}

impl WsTransport {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to WebSocket");

        let (ws_stream, response) = connect_async(&self.endpoint)
            .await
            .map_err(|e| FeedError::Transport(format!("Failed to connect: {e}")))?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Transport("Not connected".to_string()))?;

        let text = String::from_utf8_lossy(&frame).to_string();
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Transport("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text frame");
                Ok(Some(Bytes::from(text)))
            }
            Some(Ok(Message::Binary(data))) => Ok(Some(Bytes::from(data))),
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Err(FeedError::Transport("Connection closed".to_string()))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(FeedError::Transport(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Err(FeedError::Transport("Stream ended".to_string()))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

use std::fmt;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::error::ChannelError;

/// Opens push links to the backend.
#[async_trait]
pub trait RealtimeTransport: fmt::Debug + Send + Sync {
    /// Opens one link to `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn RealtimeLink>, ChannelError>;
}

/// One open, text-framed push link.
///
/// `next_text` must be cancel safe: dropping its future must not lose a frame.
#[async_trait]
pub trait RealtimeLink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Returns the next text frame, or `None` once the link closed cleanly.
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

/// [`RealtimeTransport`] over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn RealtimeLink>, ChannelError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|error| ChannelError::Connect(Box::new(error)))?;
        debug!(status = %response.status(), "websocket handshake completed");
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeLink for WebSocketLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|error| ChannelError::Send(Box::new(error)))
    }

    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(ChannelError::Receive(Box::new(error)))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_error) => trace!(len = bytes.len(), "ignoring non-utf8 binary frame"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(error) = self.stream.close(None).await {
            debug!(%error, "websocket close handshake failed");
        }
    }
}

//! Thin socket adapter for the push channel.
//!
//! [`crate::InvalidationChannel`] only needs "connect, then read text frames
//! until the stream ends". Everything transport-specific stays here.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::ClientError;

/// An open push connection. The client never writes to it.
#[async_trait]
pub trait PushSocket: Send {
    /// Next text frame. `None` once the server closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, ClientError>>;
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSocket>, ClientError>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSocket>, ClientError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::network(format!("websocket connect to {url}: {e}")))?;
        debug!(url, status = response.status().as_u16(), "push socket open");
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushSocket for WsSocket {
    async fn next_text(&mut self) -> Option<Result<String, ClientError>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(reason)) => {
                    debug!(?reason, "push socket closed by server");
                    return None;
                }
                // Pings are answered by tungstenite while the stream is polled.
                Ok(Message::Binary(bytes)) => trace!(len = bytes.len(), "skipping binary frame"),
                Ok(_) => {}
                Err(e) => return Some(Err(ClientError::network(format!("websocket read: {e}")))),
            }
        }
        None
    }
}

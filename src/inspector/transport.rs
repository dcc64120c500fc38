use super::transport_trait::InspectorTransport;
use super::types::{Request, ServerMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// CDP transport over a WebSocket connection to the target's inspector.
pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    /// Open the WebSocket to the inspector endpoint announced by the target.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        debug!("Connecting to inspector at {}", url);

        let (stream, response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "inspector did not accept the WebSocket within {:?}",
                    connect_timeout
                ))
            })?
            .map_err(|e| Error::Transport(format!("WebSocket handshake failed: {}", e)))?;

        debug!(
            "Inspector WebSocket established (HTTP {})",
            response.status()
        );

        Ok(Self { stream })
    }
}

#[async_trait]
impl InspectorTransport for WsTransport {
    async fn read_message(&mut self) -> Result<ServerMessage> {
        loop {
            let frame = self
                .stream
                .next()
                .await
                .ok_or_else(|| Error::Transport("inspector closed the connection".to_string()))?
                .map_err(|e| Error::Transport(format!("WebSocket read failed: {}", e)))?;

            match frame {
                Message::Text(text) => {
                    trace!("CDP recv: {}", text);
                    let msg: ServerMessage = serde_json::from_str(&text).map_err(|e| {
                        Error::Transport(format!("unparseable inspector frame: {}", e))
                    })?;
                    return Ok(msg);
                }
                Message::Close(_) => {
                    return Err(Error::Transport(
                        "inspector closed the connection".to_string(),
                    ));
                }
                // Pings are answered by tungstenite on the next flush.
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                    continue;
                }
            }
        }
    }

    async fn write_message(&mut self, msg: &Request) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        trace!("CDP send: {}", text);

        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Transport(format!("WebSocket write failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| Error::Transport(format!("WebSocket close failed: {}", e)))
    }
}

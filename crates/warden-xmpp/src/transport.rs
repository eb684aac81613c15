// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport seam between the worker and the upstream WebSocket.
//!
//! The worker only ever talks to a [`Transport`]; production uses
//! [`WsTransport`] over tokio-tungstenite, tests inject scripted frames.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use warden_core::WardenError;

/// Bounded wait for the close handshake before the socket is abandoned.
const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// A frame-oriented, ordered transport to the upstream chat service.
#[async_trait]
pub trait Transport: Send {
    /// Sends one text frame.
    async fn send(&mut self, frame: &str) -> Result<(), WardenError>;

    /// Receives the next text frame. `None` means the peer closed the stream.
    async fn recv(&mut self) -> Result<Option<String>, WardenError>;

    /// Closes the transport, waiting a bounded time for the handshake.
    async fn close(&mut self);
}

/// Factory for transports; the seam the worker uses to (re)connect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, WardenError>;
}

/// Production transport over a TLS WebSocket.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &str) -> Result<(), WardenError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| WardenError::TransportLost {
                message: format!("websocket send failed: {e}"),
                source: Some(Box::new(e)),
            })
    }

    async fn recv(&mut self) -> Result<Option<String>, WardenError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Ping(payload))) => {
                    // Transport-level ping; answered below the stanza layer.
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        return Err(WardenError::TransportLost {
                            message: format!("websocket pong failed: {e}"),
                            source: Some(Box::new(e)),
                        });
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by peer");
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    debug!(kind = ?other, "ignoring non-text websocket frame");
                }
                Some(Err(e)) => {
                    return Err(WardenError::TransportLost {
                        message: format!("websocket receive failed: {e}"),
                        source: Some(Box::new(e)),
                    });
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.send(Message::Close(None)).await {
            debug!(error = %e, "close frame send failed");
            return;
        }
        // Drain until the peer acknowledges or the bounded wait elapses.
        let drain = async {
            while let Some(msg) = self.stream.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_WAIT, drain).await.is_err() {
            warn!("websocket close handshake timed out");
        }
    }
}

/// Connector producing [`WsTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, WardenError> {
        let (stream, response) =
            connect_async(url)
                .await
                .map_err(|e| WardenError::TransportLost {
                    message: format!("websocket connect to {url} failed: {e}"),
                    source: Some(Box::new(e)),
                })?;
        debug!(status = %response.status(), "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

//! WebSocket transport over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{Connector, FrameSink, FrameStream, Transport, TransportError};
use crate::metrics::MESSAGES_MALFORMED_TOTAL;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens `ws://` / `wss://` links.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Connector that gives up on a handshake after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, TransportError> {
        if endpoint.is_empty() {
            return Err(TransportError::EmptyEndpoint);
        }

        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| TransportError::Timeout {
                endpoint: endpoint.to_owned(),
                timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_owned(),
                reason: e.to_string(),
            })?;
        debug!(endpoint, "websocket handshake complete");

        let (tx, rx) = ws.split();
        Ok(Transport::new(WsSink { tx }, WsFrames { rx }))
    }
}

struct WsSink {
    tx: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.tx.send(Message::text(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.tx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "websocket close failed"),
            Err(_) => debug!("websocket close timed out"),
        }
    }
}

struct WsFrames {
    rx: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.rx.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                        counter!(MESSAGES_MALFORMED_TOTAL).increment(1);
                    }
                },
                // tungstenite answers pings itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer closed websocket");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

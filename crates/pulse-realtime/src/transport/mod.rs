//! Transport seam between the connection manager and the wire.
//!
//! The manager never touches sockets directly. A [`Connector`] opens a
//! [`Transport`], which is already split into a write half ([`FrameSink`])
//! and a read half ([`FrameStream`]) so the link task can poll both at once.
//!
//! The strategy is injected rather than sniffed from the environment:
//! [`connector_for`] maps [`TransportKind`] to [`WsConnector`] or
//! [`SimulatedConnector`].

mod error;
mod simulated;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulse_settings::{RealtimeSettings, TransportKind};

pub use error::TransportError;
pub use simulated::{SimulatedConnector, SimulatedPeer};
pub use websocket::WsConnector;

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport. Failures are ordinary and drive the reconnect policy.
    async fn connect(&self, endpoint: &str) -> Result<Transport, TransportError>;
}

/// Write half of an open transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;
    /// Close the transport. Errors while closing are swallowed.
    async fn close(&mut self);
}

/// Read half of an open transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound text frame. `None` means the peer closed the link.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// An open link, split into halves.
pub struct Transport {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub stream: Box<dyn FrameStream>,
}

impl Transport {
    /// Pair two halves.
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Build the connector selected by `settings.transport`.
pub fn connector_for(settings: &RealtimeSettings) -> Arc<dyn Connector> {
    match settings.transport {
        TransportKind::WebSocket => Arc::new(WsConnector::new(Duration::from_millis(
            settings.connect_timeout_ms,
        ))),
        TransportKind::Simulated => Arc::new(SimulatedConnector::new()),
    }
}

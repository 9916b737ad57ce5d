//! Transport error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors from opening or using a transport.
///
/// None of these cross the public [`RealtimeClient`] boundary; they are
/// logged and fed into the reconnect policy.
///
/// [`RealtimeClient`]: crate::RealtimeClient
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint was given.
    #[error("endpoint must not be empty")]
    EmptyEndpoint,

    /// The handshake failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Why it failed.
        reason: String,
    },

    /// The handshake did not finish in time.
    #[error("connecting to {endpoint} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target endpoint.
        endpoint: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// WebSocket protocol or I/O error on an open link.
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// The link is already closed.
    #[error("connection closed")]
    Closed,

    /// The simulated endpoint is configured as unreachable.
    #[error("endpoint unreachable: {endpoint}")]
    Unreachable {
        /// Target endpoint.
        endpoint: String,
    },
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_display() {
        let err = TransportError::Connect {
            endpoint: "ws://cams.local/ws".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to ws://cams.local/ws: connection refused"
        );
    }

    #[test]
    fn timeout_display() {
        let err = TransportError::Timeout {
            endpoint: "ws://x".into(),
            timeout_ms: 10_000,
        };
        assert!(err.to_string().contains("10000ms"));
    }

    #[test]
    fn tungstenite_error_converts() {
        let err: TransportError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, TransportError::WebSocket(_)));
    }
}

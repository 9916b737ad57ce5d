//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of the realtime link.
///
/// A client starts out [`Disconnected`](Self::Disconnected). `Errored` means
/// the most recent open attempt failed at the transport layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// An open attempt is in flight.
    Connecting,
    /// The transport is open and inbound frames are being dispatched.
    Connected,
    /// No transport is open.
    #[default]
    Disconnected,
    /// The last open attempt failed.
    Errored,
}

impl ConnectionState {
    /// Wire/log name of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

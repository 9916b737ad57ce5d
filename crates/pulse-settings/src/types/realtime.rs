//! Realtime connection settings.

use pulse_core::ReconnectPolicy;
use pulse_core::retry::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_GROWTH_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
use serde::{Deserialize, Serialize};

/// Which transport strategy the client is built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Real WebSocket connection.
    #[default]
    #[serde(rename = "websocket")]
    WebSocket,
    /// In-memory peer, for tests and offline runs.
    Simulated,
}

/// Connection, reconnect, and transport settings for the realtime client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Event server URI.
    pub endpoint: String,
    /// Re-establish the link after unexpected drops.
    pub auto_reconnect: bool,
    /// Reconnect attempts allowed before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub base_reconnect_delay_ms: u64,
    /// Multiplier applied to the delay per attempt.
    pub reconnect_growth_factor: f64,
    /// Cap on any single reconnect delay, in milliseconds.
    pub max_reconnect_delay_ms: u64,
    /// Handshake timeout for the WebSocket transport, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound frames that may be queued on a live link.
    pub outbound_buffer: usize,
    /// Transport strategy.
    pub transport: TransportKind,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            base_reconnect_delay_ms: DEFAULT_BASE_DELAY_MS,
            reconnect_growth_factor: DEFAULT_GROWTH_FACTOR,
            max_reconnect_delay_ms: DEFAULT_MAX_DELAY_MS,
            connect_timeout_ms: 10_000,
            outbound_buffer: 256,
            transport: TransportKind::WebSocket,
        }
    }
}

impl RealtimeSettings {
    /// Backoff policy described by these settings.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.base_reconnect_delay_ms,
            growth_factor: self.reconnect_growth_factor,
            max_delay_ms: self.max_reconnect_delay_ms,
        }
    }
}

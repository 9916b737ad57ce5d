//! Tagged wire envelopes.
//!
//! Every frame on the realtime link is one JSON object:
//!
//! ```text
//! { "type": "server_status", "data": { ... }, "timestamp": 1739462400000 }
//! ```
//!
//! Inbound frames are restricted to the closed [`EventType`] set. The `data`
//! payload is opaque here; consumers interpret it per type, optionally via
//! [`EventEnvelope::payload_as`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// EventType
// ─────────────────────────────────────────────────────────────────────────────

/// Closed set of inbound event tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A camera came online, went offline, or changed health.
    CameraStatus,
    /// Progress report from a running scan.
    ScanProgress,
    /// Backend health or load change.
    ServerStatus,
    /// A threat was detected.
    ThreatAlert,
    /// Recording started, stopped, or failed.
    RecordingStatus,
    /// A live stream changed state.
    StreamStatus,
    /// Free-form user-facing notification.
    Notification,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [EventType; 7] = [
        Self::CameraStatus,
        Self::ScanProgress,
        Self::ServerStatus,
        Self::ThreatAlert,
        Self::RecordingStatus,
        Self::StreamStatus,
        Self::Notification,
    ];

    /// Wire tag for this event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CameraStatus => "camera_status",
            Self::ScanProgress => "scan_progress",
            Self::ServerStatus => "server_status",
            Self::ThreatAlert => "threat_alert",
            Self::RecordingStatus => "recording_status",
            Self::StreamStatus => "stream_status",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownEventType(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventEnvelope
// ─────────────────────────────────────────────────────────────────────────────

/// One inbound event, decoded from a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event tag.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Type-specific payload, opaque to the transport layer.
    #[serde(default)]
    pub data: Value,
    /// Sender-assigned time, ms since epoch.
    #[serde(default)]
    pub timestamp: i64,
}

/// Lenient intermediate form so unknown tags surface as
/// [`EnvelopeError::UnknownEventType`] rather than a generic serde error.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: i64,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: now_ms(),
        }
    }

    /// Decode one wire frame.
    ///
    /// A missing `data` field decodes as `null` and a missing `timestamp`
    /// as `0`. The `type` tag is required and must be a known [`EventType`].
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        let raw: RawEnvelope = serde_json::from_value(value)?;
        Ok(Self {
            event_type: raw.event_type.parse()?,
            data: raw.data,
            timestamp: raw.timestamp,
        })
    }

    /// Encode to a wire frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize the payload into a consumer-defined shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(T::deserialize(&self.data)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OutboundMessage
// ─────────────────────────────────────────────────────────────────────────────

/// A client-to-server frame.
///
/// Outbound tags are commands chosen by the caller, so they are not limited
/// to the inbound [`EventType`] set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message tag.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Message payload.
    pub data: Value,
    /// Send time, ms since epoch.
    pub timestamp: i64,
}

impl OutboundMessage {
    /// Build a message stamped with the current time.
    pub fn new(message_type: impl Into<String>, data: Value) -> Result<Self, EnvelopeError> {
        let message_type = message_type.into();
        if message_type.is_empty() {
            return Err(EnvelopeError::EmptyMessageType);
        }
        Ok(Self {
            message_type,
            data,
            timestamp: now_ms(),
        })
    }

    /// Encode to a wire frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

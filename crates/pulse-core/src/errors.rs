//! Envelope error types.

use thiserror::Error;

/// Errors raised while decoding or encoding wire envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON or did not match the envelope shape.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame parsed as JSON but is not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,
    /// The `type` tag is not one of the known event types.
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),
    /// An outbound message was given an empty type tag.
    #[error("message type must not be empty")]
    EmptyMessageType,
}

//! # pulse-core
//!
//! Foundation types shared by every Pulse crate:
//!
//! - **Connection state**: [`state::ConnectionState`], the single source of truth for link status
//! - **Envelopes**: [`envelope::EventEnvelope`] (inbound, closed [`envelope::EventType`] set)
//!   and [`envelope::OutboundMessage`] (free-form outbound tag)
//! - **Errors**: [`errors::EnvelopeError`] via `thiserror`
//! - **Retry**: [`retry::ReconnectPolicy`] and the backoff schedule
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `pulse-settings`, `pulse-realtime`, and `pulse-cli`.

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod logging;
pub mod retry;
pub mod state;

pub use envelope::{EventEnvelope, EventType, OutboundMessage};
pub use errors::EnvelopeError;
pub use retry::ReconnectPolicy;
pub use state::ConnectionState;

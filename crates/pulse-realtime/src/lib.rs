//! # pulse-realtime
//!
//! Owns one live bidirectional link to a remote event server.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `client` | [`RealtimeClient`]: connect, auto-reconnect with backoff, disconnect, send |
//! | `registry` | Per-event-type subscriber lists with isolated, ordered dispatch |
//! | `transport` | [`Connector`] seam plus WebSocket and simulated implementations |
//! | `metrics` | Counter names recorded through the `metrics` facade |
//!
//! ## Data Flow
//!
//! `transport` frame → `client` link task → [`EventEnvelope`] decode → `registry` dispatch.
//! `RealtimeClient::send_message` → bounded outbound queue → link task → `transport`.
//!
//! [`EventEnvelope`]: pulse_core::EventEnvelope

#![deny(unsafe_code)]

pub mod client;
pub mod metrics;
pub mod registry;
pub mod transport;

pub use client::{ConnectionEvent, RealtimeClient};
pub use registry::{DispatchReport, EventHandler, SubscriberRegistry, Subscription, handler};
pub use transport::{
    Connector, FrameSink, FrameStream, SimulatedConnector, SimulatedPeer, Transport,
    TransportError, WsConnector, connector_for,
};

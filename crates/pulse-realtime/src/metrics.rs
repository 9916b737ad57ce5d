//! Metric names recorded by the realtime client.
//!
//! The library only records through the `metrics` facade; installing a
//! recorder/exporter is left to the embedding application.

/// Inbound envelopes decoded and dispatched (counter, labels: type).
pub const MESSAGES_RECEIVED_TOTAL: &str = "realtime_messages_received_total";
/// Inbound frames dropped because they failed to decode (counter).
pub const MESSAGES_MALFORMED_TOTAL: &str = "realtime_messages_malformed_total";
/// Outbound frames written to the transport (counter).
pub const MESSAGES_SENT_TOTAL: &str = "realtime_messages_sent_total";
/// Subscriber handlers that panicked during dispatch (counter, labels: type).
pub const HANDLER_PANICS_TOTAL: &str = "realtime_handler_panics_total";
/// Reconnect attempts scheduled (counter).
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "realtime_reconnect_attempts_total";
/// Reconnect policies that ran out of attempts (counter).
pub const RECONNECT_EXHAUSTED_TOTAL: &str = "realtime_reconnect_exhausted_total";

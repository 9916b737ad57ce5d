//! Subscriber registry: event type → ordered handler list.
//!
//! Handlers are compared by pointer identity, so registering the same
//! [`EventHandler`] twice under one type is a no-op. Dispatch snapshots the
//! list and invokes handlers outside the lock, which lets a handler
//! subscribe or unsubscribe without deadlocking. A panicking handler is
//! caught, logged and counted; the rest of the list still runs.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::RwLock;
use pulse_core::{EventEnvelope, EventType};
use serde_json::Value;
use tracing::{error, trace};

use crate::metrics::HANDLER_PANICS_TOTAL;

/// A subscriber callback. Receives the envelope's `data` payload.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`].
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of dispatching one envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that ran to completion.
    pub invoked: usize,
    /// Handlers that panicked.
    pub failed: usize,
}

/// Per-event-type handler lists.
#[derive(Default)]
pub struct SubscriberRegistry {
    handlers: RwLock<HashMap<EventType, Vec<EventHandler>>>,
}

fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl SubscriberRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `event_type`.
    ///
    /// Returns `false` if that exact handler is already registered there.
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(event_type).or_default();
        if list.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        list.push(handler);
        true
    }

    /// Remove `handler` from the list for `event_type`.
    ///
    /// Returns `false` if it was not registered. Empty lists are dropped.
    pub fn unsubscribe(&self, event_type: EventType, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !same_handler(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = handlers.remove(&event_type);
        }
        removed
    }

    /// Handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers.read().get(&event_type).map_or(0, Vec::len)
    }

    /// Invoke every handler for the envelope's type, in registration order.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&envelope.event_type)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        if snapshot.is_empty() {
            trace!(event_type = %envelope.event_type, "no subscribers");
            return report;
        }

        for handler in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&envelope.data))) {
                Ok(()) => report.invoked += 1,
                Err(payload) => {
                    report.failed += 1;
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_owned());
                    error!(
                        event_type = %envelope.event_type,
                        reason = %reason,
                        "subscriber handler panicked"
                    );
                    counter!(HANDLER_PANICS_TOTAL, "type" => envelope.event_type.as_str())
                        .increment(1);
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut map = f.debug_map();
        for (ty, list) in handlers.iter() {
            let _ = map.entry(&ty.as_str(), &list.len());
        }
        map.finish()
    }
}

/// Handle returned by [`RealtimeClient::subscribe`](crate::RealtimeClient::subscribe).
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    event_type: EventType,
    handler: EventHandler,
}

impl Subscription {
    pub(crate) fn new(
        registry: &Arc<SubscriberRegistry>,
        event_type: EventType,
        handler: EventHandler,
    ) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            event_type,
            handler,
        }
    }

    /// Event type this subscription listens to.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Remove the handler. `false` if it was already gone or the client was dropped.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|r| r.unsubscribe(self.event_type, &self.handler))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

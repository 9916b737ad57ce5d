//! The connection manager.
//!
//! [`RealtimeClient`] owns at most one live transport. Each [`connect`]
//! spawns a connection task that opens the link, pumps frames both ways,
//! and on loss re-opens it with bounded exponential backoff. Callers never
//! see errors: every operation answers with a boolean, a state, or a
//! [`ConnectionEvent`] on the lifecycle channel.
//!
//! Every state write made by a connection task carries the epoch it was
//! spawned under. `connect` and `disconnect` bump the epoch, so a task that
//! has been superseded can finish winding down without clobbering newer
//! state.
//!
//! [`connect`]: RealtimeClient::connect

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use pulse_core::{ConnectionState, EventEnvelope, EventType, OutboundMessage, ReconnectPolicy};
use pulse_settings::RealtimeSettings;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::metrics::{
    MESSAGES_MALFORMED_TOTAL, MESSAGES_RECEIVED_TOTAL, MESSAGES_SENT_TOTAL,
    RECONNECT_ATTEMPTS_TOTAL, RECONNECT_EXHAUSTED_TOTAL,
};
use crate::registry::{EventHandler, SubscriberRegistry, Subscription, handler};
use crate::transport::{Connector, FrameSink, Transport, connector_for};

/// Buffered lifecycle events per receiver before it starts lagging.
const LIFECYCLE_CAPACITY: usize = 64;

/// Lifecycle notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged {
        /// New state.
        state: ConnectionState,
    },
    /// A reconnect attempt will be made after `delay_ms`.
    ReconnectScheduled {
        /// 1-indexed attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay_ms: u64,
    },
    /// The reconnect budget is spent; no further attempts will be made.
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

struct LinkTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    state: ConnectionState,
    endpoint: Option<String>,
    reconnect_attempts: u32,
    auto_reconnect: bool,
    epoch: u64,
    outbound: Option<mpsc::Sender<String>>,
    task: Option<LinkTask>,
}

struct Shared {
    settings: RealtimeSettings,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriberRegistry>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.lifecycle.send(event);
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state == state {
            return;
        }
        info!(from = %inner.state, to = %state, "connection state changed");
        inner.state = state;
        self.emit(ConnectionEvent::StateChanged { state });
    }

    /// Apply `state` if `epoch` is still current.
    fn transition(&self, epoch: u64, state: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        self.set_state(&mut inner, state);
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    /// Register a freshly opened link. `None` if the task was superseded.
    fn on_open(&self, epoch: u64) -> Option<mpsc::Receiver<String>> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return None;
        }
        let (tx, rx) = mpsc::channel(self.settings.outbound_buffer.max(1));
        inner.outbound = Some(tx);
        inner.reconnect_attempts = 0;
        self.set_state(&mut inner, ConnectionState::Connected);
        Some(rx)
    }

    fn on_link_closed(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.outbound = None;
        self.set_state(&mut inner, ConnectionState::Disconnected);
    }

    /// Claim the next reconnect attempt, or `None` when reconnecting is off,
    /// superseded, or out of budget.
    fn next_reconnect(&self, epoch: u64) -> Option<Duration> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || !inner.auto_reconnect {
            return None;
        }

        let attempt = inner.reconnect_attempts + 1;
        let Some(delay) = self.policy.delay_for_attempt(attempt) else {
            let attempts = inner.reconnect_attempts;
            error!(
                endpoint = inner.endpoint.as_deref().unwrap_or_default(),
                attempts, "could not reconnect, giving up"
            );
            counter!(RECONNECT_EXHAUSTED_TOTAL).increment(1);
            self.emit(ConnectionEvent::ReconnectExhausted { attempts });
            return None;
        };

        inner.reconnect_attempts = attempt;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms,
            "scheduling reconnect"
        );
        counter!(RECONNECT_ATTEMPTS_TOTAL).increment(1);
        self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay_ms });
        Some(delay)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RealtimeClient
// ─────────────────────────────────────────────────────────────────────────────

/// Realtime connection manager.
///
/// Construct one per consumer and pass it where it is needed; there is no
/// process-wide instance. Dropping the client cancels its connection task.
pub struct RealtimeClient {
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Client that opens links through `connector`.
    pub fn new(settings: RealtimeSettings, connector: Arc<dyn Connector>) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let policy = settings.reconnect_policy();
        let auto_reconnect = settings.auto_reconnect;
        Self {
            shared: Arc::new(Shared {
                settings,
                policy,
                connector,
                registry: Arc::new(SubscriberRegistry::new()),
                lifecycle,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    endpoint: None,
                    reconnect_attempts: 0,
                    auto_reconnect,
                    epoch: 0,
                    outbound: None,
                    task: None,
                }),
            }),
        }
    }

    /// Client using the transport selected in `settings`.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self::new(settings.clone(), connector_for(settings))
    }

    /// Open a link to `endpoint`, replacing any existing one.
    ///
    /// Resolves to `true` once the first attempt succeeds and `false` if it
    /// fails or is superseded. A failed first attempt still enters the
    /// reconnect cycle when auto-reconnect is enabled.
    pub async fn connect(&self, endpoint: &str) -> bool {
        if endpoint.is_empty() {
            warn!("connect called with an empty endpoint");
            return false;
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut inner = self.shared.inner.lock();
            inner.epoch += 1;
            inner.reconnect_attempts = 0;
            inner.auto_reconnect = self.shared.settings.auto_reconnect;
            inner.endpoint = Some(endpoint.to_owned());
            inner.outbound = None;

            let previous = inner.task.take().map(|task| {
                task.cancel.cancel();
                task.handle
            });
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(supervise(
                Arc::clone(&self.shared),
                Attempt {
                    epoch: inner.epoch,
                    endpoint: endpoint.to_owned(),
                    cancel: cancel.clone(),
                    previous,
                    ready: ready_tx,
                },
            ));
            inner.task = Some(LinkTask { cancel, handle });
            self.shared.set_state(&mut inner, ConnectionState::Connecting);
        }
        info!(endpoint, "connecting");

        ready_rx.await.unwrap_or(false)
    }

    /// Close the link and stop reconnecting. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let cancel = {
            let mut inner = self.shared.inner.lock();
            inner.auto_reconnect = false;
            inner.epoch += 1;
            inner.outbound = None;
            self.shared.set_state(&mut inner, ConnectionState::Disconnected);
            inner.task.as_ref().map(|task| task.cancel.clone())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    /// Disconnect and wait until the transport has been closed.
    ///
    /// Messages already accepted by [`send_message`](Self::send_message)
    /// are written before the link closes.
    pub async fn dispose(self) {
        self.disconnect();
        let handle = self.shared.inner.lock().task.take().map(|t| t.handle);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "connection task ended abnormally");
            }
        }
    }

    /// Register `handler` for `event_type`. Registering the same handler
    /// twice under one type has no effect.
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) -> Subscription {
        let _ = self
            .shared
            .registry
            .subscribe(event_type, Arc::clone(&handler));
        Subscription::new(&self.shared.registry, event_type, handler)
    }

    /// Register a closure for `event_type`.
    pub fn on<F>(&self, event_type: EventType, f: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(event_type, handler(f))
    }

    /// Remove `handler` from `event_type`. `false` if it was not registered.
    pub fn unsubscribe(&self, event_type: EventType, handler: &EventHandler) -> bool {
        self.shared.registry.unsubscribe(event_type, handler)
    }

    /// Handlers registered for `event_type`.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.shared.registry.handler_count(event_type)
    }

    /// Queue one message for the server.
    ///
    /// `true` means the frame was queued on the live link, not that it was
    /// delivered: if the peer drops before the link task writes it, the
    /// frame is lost. Returns `false` without queueing when not connected,
    /// when `message_type` is empty, or when the outbound buffer is full.
    pub fn send_message(&self, message_type: &str, data: Value) -> bool {
        let outbound = {
            let inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Connected {
                warn!(message_type, state = %inner.state, "not connected, message not sent");
                return false;
            }
            inner.outbound.clone()
        };
        let Some(outbound) = outbound else {
            return false;
        };

        let frame = match OutboundMessage::new(message_type, data).and_then(|m| m.encode()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(message_type, error = %e, "message not sent");
                return false;
            }
        };

        match outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(message_type, "outbound buffer full, message not sent");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(message_type, "link closed before message was queued");
                false
            }
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Whether the state is [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.inner.lock().reconnect_attempts
    }

    /// Endpoint of the most recent `connect`.
    pub fn endpoint(&self) -> Option<String> {
        self.shared.inner.lock().endpoint.clone()
    }

    /// Subscribe to lifecycle notifications from this point on.
    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.lifecycle.subscribe()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.epoch += 1;
        inner.auto_reconnect = false;
        inner.outbound = None;
        if let Some(task) = &inner.task {
            task.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("RealtimeClient")
            .field("state", &inner.state)
            .field("endpoint", &inner.endpoint)
            .field("reconnect_attempts", &inner.reconnect_attempts)
            .field("registry", &self.shared.registry)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection task
// ─────────────────────────────────────────────────────────────────────────────

struct Attempt {
    epoch: u64,
    endpoint: String,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
    ready: oneshot::Sender<bool>,
}

#[derive(Debug, PartialEq, Eq)]
enum LinkEnd {
    /// Disconnected or superseded locally.
    Cancelled,
    /// Peer closed the link or the transport failed.
    Dropped,
}

/// Open, run, and re-open one endpoint until cancelled or out of attempts.
async fn supervise(shared: Arc<Shared>, attempt: Attempt) {
    let Attempt {
        epoch,
        endpoint,
        cancel,
        previous,
        ready,
    } = attempt;
    let mut ready = Some(ready);

    if let Some(previous) = previous {
        let _ = previous.await;
    }

    loop {
        if cancel.is_cancelled() || !shared.transition(epoch, ConnectionState::Connecting) {
            return;
        }

        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            result = shared.connector.connect(&endpoint) => result,
        };

        match opened {
            Ok(mut transport) => {
                let Some(outbound) = shared.on_open(epoch) else {
                    transport.sink.close().await;
                    return;
                };
                info!(endpoint = %endpoint, "connected");
                if let Some(ready) = ready.take() {
                    let _ = ready.send(true);
                }

                let end = run_link(&shared, transport, outbound, &cancel).await;
                shared.on_link_closed(epoch);
                if end == LinkEnd::Cancelled {
                    return;
                }
                info!(endpoint = %endpoint, "connection lost");
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "connection attempt failed");
                let _ = shared.transition(epoch, ConnectionState::Errored);
                if let Some(ready) = ready.take() {
                    let _ = ready.send(false);
                }
            }
        }

        let Some(delay) = shared.next_reconnect(epoch) else {
            return;
        };
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if !shared.is_current(epoch) || shared.inner.lock().state == ConnectionState::Connected {
            return;
        }
    }
}

/// Pump frames until the link ends. The sink is always closed on return.
async fn run_link(
    shared: &Shared,
    transport: Transport,
    mut outbound: mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> LinkEnd {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    let end = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                while let Ok(frame) = outbound.try_recv() {
                    if !write_frame(sink.as_mut(), frame).await {
                        break;
                    }
                }
                break LinkEnd::Cancelled;
            }

            frame = outbound.recv() => {
                // Every sender is gone: the client released this link.
                let Some(frame) = frame else { break LinkEnd::Cancelled };
                if !write_frame(sink.as_mut(), frame).await {
                    break LinkEnd::Dropped;
                }
            }

            inbound = stream.next_frame() => match inbound {
                Some(Ok(text)) => handle_frame(&shared.registry, &text),
                Some(Err(e)) => {
                    warn!(error = %e, "transport error");
                    break LinkEnd::Dropped;
                }
                None => {
                    debug!("peer closed the link");
                    break LinkEnd::Dropped;
                }
            },
        }
    };

    sink.close().await;
    end
}

async fn write_frame<S: FrameSink + ?Sized>(sink: &mut S, frame: String) -> bool {
    let len = frame.len();
    match sink.send(frame).await {
        Ok(()) => {
            trace!(len, "frame sent");
            counter!(MESSAGES_SENT_TOTAL).increment(1);
            true
        }
        Err(e) => {
            warn!(error = %e, "failed to write frame");
            false
        }
    }
}

/// Decode one inbound frame and dispatch it. Bad frames are dropped.
pub(crate) fn handle_frame(registry: &SubscriberRegistry, text: &str) {
    match EventEnvelope::decode(text) {
        Ok(envelope) => {
            counter!(MESSAGES_RECEIVED_TOTAL, "type" => envelope.event_type.as_str()).increment(1);
            let report = registry.dispatch(&envelope);
            trace!(
                event_type = %envelope.event_type,
                invoked = report.invoked,
                failed = report.failed,
                "dispatched"
            );
        }
        Err(e) => {
            warn!(error = %e, len = text.len(), "dropping malformed frame");
            counter!(MESSAGES_MALFORMED_TOTAL).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedConnector;
    use assert_matches::assert_matches;
    use pulse_settings::TransportKind;
    use serde_json::json;

    fn settings_with(f: impl FnOnce(&mut RealtimeSettings)) -> RealtimeSettings {
        let mut settings = RealtimeSettings {
            transport: TransportKind::Simulated,
            ..RealtimeSettings::default()
        };
        f(&mut settings);
        settings
    }

    fn client_for(connector: &SimulatedConnector, settings: RealtimeSettings) -> RealtimeClient {
        RealtimeClient::new(settings, Arc::new(connector.clone()))
    }

    /// Let spawned tasks run. Time is paused, so this only advances the clock
    /// once every task is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn next_matching(
        events: &mut broadcast::Receiver<ConnectionEvent>,
        pred: impl Fn(&ConnectionEvent) -> bool,
    ) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(300), async {
            loop {
                let event = events.recv().await.expect("lifecycle channel");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("lifecycle event")
    }

    fn collector() -> (Arc<Mutex<Vec<Value>>>, EventHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, handler(move |data| sink.lock().push(data.clone())))
    }

    // ── connect / disconnect ────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        assert!(client.connect("sim://cams").await);
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert!(client.is_connected());
        assert_eq!(client.endpoint().as_deref(), Some("sim://cams"));
        assert_eq!(connector.live_links(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_endpoint_is_rejected_without_side_effects() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(!client.connect("").await);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.endpoint(), None);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_link_and_is_idempotent() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(client.connect("sim://cams").await);

        client.disconnect();
        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        settle().await;
        assert!(connector.latest_peer().unwrap().is_closed());
        assert_eq!(connector.live_links(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_supersedes_first() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(client.connect("sim://a").await);
        assert!(client.connect("sim://b").await);

        let peers = connector.peers();
        assert_eq!(peers.len(), 2);
        assert!(peers[0].is_closed());
        assert!(!peers[1].is_closed());
        assert_eq!(peers[1].endpoint(), "sim://b");
        assert_eq!(connector.live_links(), 1);
        assert_eq!(client.endpoint().as_deref(), Some("sim://b"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_slow_connect_wins() {
        let connector = SimulatedConnector::new();
        connector.set_connect_delay(Duration::from_secs(1));
        let client = client_for(&connector, settings_with(|_| {}));

        let (connected, ()) = tokio::join!(client.connect("sim://slow"), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.disconnect();
        });

        assert!(!connected);
        settle().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(connector.peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_client_closes_link() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(client.connect("sim://cams").await);
        drop(client);
        settle().await;
        assert!(connector.latest_peer().unwrap().is_closed());
    }

    // ── reconnect ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_then_gives_up() {
        let connector = SimulatedConnector::unreachable();
        let client = client_for(
            &connector,
            settings_with(|s| {
                s.max_reconnect_attempts = 3;
                s.base_reconnect_delay_ms = 100;
            }),
        );
        let mut events = client.lifecycle();
        let started = tokio::time::Instant::now();

        assert!(!client.connect("sim://down").await);

        let mut scheduled = Vec::new();
        let exhausted = loop {
            match next_matching(&mut events, |e| {
                !matches!(e, ConnectionEvent::StateChanged { .. })
            })
            .await
            {
                ConnectionEvent::ReconnectScheduled { attempt, delay_ms } => {
                    scheduled.push((attempt, delay_ms));
                }
                other => break other,
            }
        };

        assert_eq!(scheduled, vec![(1, 100), (2, 150), (3, 225)]);
        assert_eq!(exhausted, ConnectionEvent::ReconnectExhausted { attempts: 3 });
        assert_eq!(connector.attempts(), 4);
        assert!(started.elapsed() >= Duration::from_millis(475));
        assert_eq!(client.connection_state(), ConnectionState::Errored);

        // nothing further is attempted
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempt_budget_exhausts_immediately() {
        let connector = SimulatedConnector::unreachable();
        let client = client_for(&connector, settings_with(|s| s.max_reconnect_attempts = 0));
        let mut events = client.lifecycle();

        assert!(!client.connect("sim://down").await);
        let event = next_matching(&mut events, |e| {
            !matches!(e, ConnectionEvent::StateChanged { .. })
        })
        .await;
        assert_eq!(event, ConnectionEvent::ReconnectExhausted { attempts: 0 });
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_attempt_counter() {
        let connector = SimulatedConnector::new();
        connector.fail_next(2);
        let client = client_for(&connector, settings_with(|s| s.base_reconnect_delay_ms = 100));
        let mut events = client.lifecycle();

        assert!(!client.connect("sim://flaky").await);
        let _ = next_matching(&mut events, |e| {
            *e == ConnectionEvent::StateChanged {
                state: ConnectionState::Connected,
            }
        })
        .await;

        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(connector.attempts(), 3);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn peer_drop_triggers_reconnect() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(client.connect("sim://cams").await);
        let mut events = client.lifecycle();

        connector.latest_peer().unwrap().drop_connection();

        let scheduled = next_matching(&mut events, |e| {
            matches!(e, ConnectionEvent::ReconnectScheduled { .. })
        })
        .await;
        assert_eq!(
            scheduled,
            ConnectionEvent::ReconnectScheduled {
                attempt: 1,
                delay_ms: 2000
            }
        );
        let _ = next_matching(&mut events, |e| {
            *e == ConnectionEvent::StateChanged {
                state: ConnectionState::Connected,
            }
        })
        .await;

        assert_eq!(connector.peers().len(), 2);
        assert_eq!(connector.live_links(), 1);
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_triggers_reconnect() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|s| s.base_reconnect_delay_ms = 50));
        assert!(client.connect("sim://cams").await);
        let mut events = client.lifecycle();

        assert!(connector.latest_peer().unwrap().push_error());
        let _ = next_matching(&mut events, |e| {
            *e == ConnectionEvent::StateChanged {
                state: ConnectionState::Connected,
            }
        })
        .await;
        assert_eq!(connector.peers().len(), 2);
        assert!(connector.peers()[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_when_disabled() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|s| s.auto_reconnect = false));
        assert!(client.connect("sim://cams").await);

        connector.latest_peer().unwrap().drop_connection();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_after_disconnect_does_not_reconnect() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|s| s.base_reconnect_delay_ms = 100));
        assert!(client.connect("sim://cams").await);
        let mut events = client.lifecycle();

        client.disconnect();
        connector.latest_peer().unwrap().drop_connection();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ConnectionEvent::ReconnectScheduled { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let connector = SimulatedConnector::unreachable();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(!client.connect("sim://down").await);
        settle().await;

        client.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rearms_reconnect_after_disconnect() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|s| s.base_reconnect_delay_ms = 10));
        assert!(client.connect("sim://cams").await);
        client.disconnect();
        assert!(client.connect("sim://cams").await);
        let mut events = client.lifecycle();

        connector.latest_peer().unwrap().drop_connection();
        let _ = next_matching(&mut events, |e| {
            *e == ConnectionEvent::StateChanged {
                state: ConnectionState::Connected,
            }
        })
        .await;
        assert_eq!(connector.peers().len(), 3);
    }

    // ── inbound dispatch ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_subscribers() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let (first, h1) = collector();
        let (second, h2) = collector();
        let _a = client.subscribe(EventType::ServerStatus, h1);
        let _b = client.subscribe(EventType::ServerStatus, h2);

        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();
        assert!(peer.push(r#"{"type":"server_status","data":{"status":"degraded"},"timestamp":123}"#));
        settle().await;

        assert_eq!(*first.lock(), vec![json!({"status": "degraded"})]);
        assert_eq!(*second.lock(), vec![json!({"status": "degraded"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_subscribe_dispatches_once() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let (seen, h) = collector();
        let _a = client.subscribe(EventType::ThreatAlert, Arc::clone(&h));
        let _b = client.subscribe(EventType::ThreatAlert, Arc::clone(&h));
        assert_eq!(client.subscriber_count(EventType::ThreatAlert), 1);

        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();
        assert!(peer.push_envelope(&EventEnvelope::new(
            EventType::ThreatAlert,
            json!({"level": "high"})
        )));
        settle().await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_run_in_registration_order() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["one", "two", "three"] {
            let order = Arc::clone(&order);
            let _ = client.on(EventType::ScanProgress, move |_| order.lock().push(tag));
        }

        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();
        assert!(peer.push(r#"{"type":"scan_progress","data":{"pct":10}}"#));
        settle().await;
        assert_eq!(*order.lock(), vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_break_link() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let _boom = client.on(EventType::CameraStatus, |_| panic!("handler failure"));
        let (seen, h) = collector();
        let _ok = client.subscribe(EventType::CameraStatus, h);

        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();
        assert!(peer.push(r#"{"type":"camera_status","data":1}"#));
        assert!(peer.push(r#"{"type":"camera_status","data":2}"#));
        settle().await;

        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let (seen, h) = collector();
        let _sub = client.subscribe(EventType::Notification, h);

        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();
        assert!(peer.push("not json"));
        assert!(peer.push(r#"{"type":"bogus","data":{}}"#));
        assert!(peer.push(r#"["notification"]"#));
        assert!(peer.push(r#"{"type":"notification","data":"ok"}"#));
        settle().await;

        assert_eq!(*seen.lock(), vec![json!("ok")]);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let (seen, h) = collector();
        let sub = client.subscribe(EventType::RecordingStatus, h);

        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();
        assert!(peer.push(r#"{"type":"recording_status","data":1}"#));
        settle().await;
        assert!(sub.unsubscribe());
        assert!(peer.push(r#"{"type":"recording_status","data":2}"#));
        settle().await;

        assert_eq!(*seen.lock(), vec![json!(1)]);
        assert!(!client.unsubscribe(EventType::RecordingStatus, &handler(|_| {})));
    }

    // ── outbound ────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn send_requires_connection() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(!client.send_message("start_scan", json!({})));

        assert!(client.connect("sim://cams").await);
        assert!(client.send_message("start_scan", json!({"camera": 3})));
        settle().await;

        let sent = connector.latest_peer().unwrap().sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "start_scan");
        assert_eq!(sent[0]["data"], json!({"camera": 3}));
        assert!(sent[0]["timestamp"].as_i64().unwrap() > 0);

        client.disconnect();
        assert!(!client.send_message("start_scan", json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_message_type_is_refused() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(client.connect("sim://cams").await);
        assert!(!client.send_message("", json!(null)));
        settle().await;
        assert!(connector.latest_peer().unwrap().sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_refuses_send() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|s| s.outbound_buffer = 1));
        assert!(client.connect("sim://cams").await);
        // the link task has not run yet, so the first frame is still queued
        assert!(client.send_message("a", json!(1)));
        assert!(!client.send_message("b", json!(2)));
        settle().await;
        assert_eq!(connector.latest_peer().unwrap().sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_frame_is_lost_when_peer_drops_first() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|s| s.auto_reconnect = false));
        assert!(client.connect("sim://cams").await);
        let peer = connector.latest_peer().unwrap();

        peer.drop_connection();
        // the link task has not observed the drop yet
        assert!(client.send_message("start_scan", json!({})));
        settle().await;

        assert!(peer.sent().is_empty());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.send_message("start_scan", json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_flushes_queued_messages() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        assert!(client.connect("sim://cams").await);
        for n in 0..3 {
            assert!(client.send_message("ping", json!(n)));
        }
        client.dispose().await;

        let peer = connector.latest_peer().unwrap();
        let data: Vec<Value> = peer.sent_messages().into_iter().map(|m| m["data"].clone()).collect();
        assert_eq!(data, vec![json!(0), json!(1), json!(2)]);
        assert!(peer.is_closed());
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn lifecycle_reports_state_sequence() {
        let connector = SimulatedConnector::new();
        let client = client_for(&connector, settings_with(|_| {}));
        let mut events = client.lifecycle();

        assert!(client.connect("sim://cams").await);
        client.disconnect();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::StateChanged { state } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected
            ]
        );
    }

    #[tokio::test]
    async fn from_settings_uses_configured_transport() {
        let client = RealtimeClient::from_settings(&settings_with(|_| {}));
        assert!(client.connect("sim://anything").await);
        assert_matches!(client.connection_state(), ConnectionState::Connected);
        client.dispose().await;
    }
}

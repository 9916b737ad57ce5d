//! In-process transport for tests, demos and offline development.
//!
//! Every successful [`SimulatedConnector::connect`] creates a
//! [`SimulatedPeer`]: the "server side" of that link. Tests push frames
//! through the peer, read what the client wrote, and drop the link to
//! exercise reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::EventEnvelope;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connector, FrameSink, FrameStream, Transport, TransportError};

type Inbound = Result<String, TransportError>;

#[derive(Default)]
struct SimState {
    unreachable: bool,
    failures_remaining: u32,
    connect_delay: Option<Duration>,
    attempts: u32,
    peers: Vec<SimulatedPeer>,
}

/// Connector whose links live entirely in memory.
///
/// Cloning shares state, so a test can keep one handle while the client
/// owns another.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedConnector {
    /// A connector that accepts every attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that refuses every attempt until [`set_reachable`](Self::set_reachable).
    pub fn unreachable() -> Self {
        let connector = Self::new();
        connector.set_reachable(false);
        connector
    }

    /// Toggle whether attempts succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Refuse the next `n` attempts, then resume normal behaviour.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().failures_remaining = n;
    }

    /// Hold every attempt for `delay` before resolving it.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Connect attempts seen so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Server sides of every link opened so far, oldest first.
    pub fn peers(&self) -> Vec<SimulatedPeer> {
        self.state.lock().peers.clone()
    }

    /// Most recently opened link.
    pub fn latest_peer(&self) -> Option<SimulatedPeer> {
        self.state.lock().peers.last().cloned()
    }

    /// Links not yet closed by either side.
    pub fn live_links(&self) -> usize {
        self.state
            .lock()
            .peers
            .iter()
            .filter(|p| !p.is_closed())
            .count()
    }
}

impl std::fmt::Debug for SimulatedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedConnector")
            .field("unreachable", &state.unreachable)
            .field("attempts", &state.attempts)
            .field("peers", &state.peers.len())
            .finish()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, TransportError> {
        if endpoint.is_empty() {
            return Err(TransportError::EmptyEndpoint);
        }

        let (refuse, delay) = {
            let mut state = self.state.lock();
            state.attempts += 1;
            let refuse = if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                true
            } else {
                state.unreachable
            };
            (refuse, state.connect_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if refuse {
            return Err(TransportError::Unreachable {
                endpoint: endpoint.to_owned(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = SimulatedPeer {
            shared: Arc::new(PeerShared {
                endpoint: endpoint.to_owned(),
                inbound: Mutex::new(Some(tx)),
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };
        self.state.lock().peers.push(peer.clone());
        debug!(endpoint, "simulated link opened");

        Ok(Transport::new(SimSink { peer }, SimStream { rx }))
    }
}

struct PeerShared {
    endpoint: String,
    inbound: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

/// Server side of one simulated link.
#[derive(Clone)]
pub struct SimulatedPeer {
    shared: Arc<PeerShared>,
}

impl SimulatedPeer {
    /// Endpoint the client asked for.
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Deliver a raw text frame to the client. False once the link is closed.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.deliver(Ok(frame.into()))
    }

    /// Deliver an encoded envelope.
    pub fn push_envelope(&self, envelope: &EventEnvelope) -> bool {
        match envelope.encode() {
            Ok(frame) => self.push(frame),
            Err(_) => false,
        }
    }

    /// Fail the read half with a transport error.
    pub fn push_error(&self) -> bool {
        self.deliver(Err(TransportError::Closed))
    }

    /// Close the link from the server side.
    pub fn drop_connection(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        drop(self.shared.inbound.lock().take());
    }

    /// Raw frames the client has written, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().clone()
    }

    /// Written frames parsed as JSON. Unparseable frames are skipped.
    pub fn sent_messages(&self) -> Vec<Value> {
        self.shared
            .sent
            .lock()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Whether either side has closed the link.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, item: Inbound) -> bool {
        if self.is_closed() {
            return false;
        }
        self.shared
            .inbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }
}

impl std::fmt::Debug for SimulatedPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPeer")
            .field("endpoint", &self.shared.endpoint)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct SimSink {
    peer: SimulatedPeer,
}

#[async_trait]
impl FrameSink for SimSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.peer.is_closed() {
            return Err(TransportError::Closed);
        }
        self.peer.shared.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        self.peer.drop_connection();
    }
}

struct SimStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameStream for SimStream {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}

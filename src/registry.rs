//! Set of currently reachable agent connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{broadcast as tokio_broadcast, mpsc};

pub type ConnectionId = u64;

/// Lifecycle events emitted when agents attach or detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Connected { id: ConnectionId },
    Disconnected { id: ConnectionId },
}

/// Send half of one agent channel. The queue is unbounded so a slow socket
/// writer delays delivery instead of refusing it. The matching receiver is
/// drained by the transport task that owns the socket; once that task exits
/// the sender reports closed.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl AgentConnection {
    /// Create a connection with a fresh id and its outbound receiver.
    pub fn new(registry: &ConnectionRegistry) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue `frame` without blocking. Fails only once the transport is gone.
    fn send(&self, frame: Bytes) -> bool {
        if self.tx.send(frame).is_err() {
            tracing::debug!(connection_id = self.id, "agent connection closed, skipping");
            return false;
        }
        true
    }
}

/// Tracks open agent connections and fans requests out to all of them.
///
/// No routing is performed: every open connection receives every request.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, AgentConnection>>>,
    next_id: Arc<AtomicU64>,
    events_tx: tokio_broadcast::Sender<AgentEvent>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (events_tx, _) = tokio_broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            events_tx,
        }
    }

    pub fn register(&self, connection: AgentConnection) {
        let id = connection.id;
        self.inner.write().insert(id, connection);
        tracing::info!(connection_id = id, "agent connected");
        let _ = self.events_tx.send(AgentEvent::Connected { id });
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.inner.write().remove(&id).is_some();
        if removed {
            tracing::info!(connection_id = id, "agent disconnected");
            let _ = self.events_tx.send(AgentEvent::Disconnected { id });
        }
        removed
    }

    /// Queue `frame` on every open connection and return how many accepted it.
    ///
    /// The connection set is snapshotted first so concurrent
    /// register/unregister calls never contend with the sends. Connections
    /// that fail are left in place; their transport task unregisters them.
    pub fn broadcast(&self, frame: Bytes) -> usize {
        let targets: Vec<AgentConnection> = self.inner.read().values().cloned().collect();
        targets
            .iter()
            .filter(|conn| conn.send(frame.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().contains_key(&id)
    }

    /// Number of registered connections whose transport is still attached.
    pub fn open_count(&self) -> usize {
        self.inner.read().values().filter(|c| c.is_open()).count()
    }

    pub fn subscribe_events(&self) -> tokio_broadcast::Receiver<AgentEvent> {
        self.events_tx.subscribe()
    }
}

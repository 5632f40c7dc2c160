use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Signals long-lived connection handlers that the server is stopping, and
/// counts how many are still running.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
    active: Arc<AtomicUsize>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a connection. The guard decrements the active count on drop;
    /// the receiver flips to `true` when shutdown begins.
    pub fn register(&self) -> (ConnectionGuard, watch::Receiver<bool>) {
        self.active.fetch_add(1, Ordering::AcqRel);
        (
            ConnectionGuard {
                active: self.active.clone(),
            },
            self.tx.subscribe(),
        )
    }

    pub fn shutdown(&self) {
        // send_replace never fails, even with no receivers.
        self.tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

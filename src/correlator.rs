//! Pending-task table: matches agent responses to waiting tasks and owns
//! each task's timeout timer.
//!
//! Every exit path (response, timeout, rollback, cancellation) goes through
//! [`Correlator::take`], a single remove-and-return under the table lock.
//! Whichever path removes the entry first is the only one that writes the
//! task's result slot; later arrivals find nothing and are discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::protocol::TaskResponse;
use crate::task::{Resolver, TaskFailure};

/// Failure message used when an agent reports failure without one.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Task execution failed";

struct PendingEntry {
    resolver: Resolver,
    timer: CancellationToken,
}

#[derive(Clone, Default)]
pub struct Correlator {
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry for the resolver's task and arm its timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(&self, resolver: Resolver, timeout: Duration) {
        let id = resolver.task_id().to_string();
        let timer = CancellationToken::new();

        let replaced = self.pending.lock().insert(
            id.clone(),
            PendingEntry {
                resolver,
                timer: timer.clone(),
            },
        );
        if let Some(stale) = replaced {
            stale.timer.cancel();
            tracing::warn!(task_id = %id, "task registered twice, previous entry dropped");
        }

        let correlator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(entry) = correlator.take(&id) {
                        tracing::warn!(task_id = %id, ?timeout, "task timed out");
                        entry.resolver.reject(TaskFailure::TimedOut { id, after: timeout });
                    }
                }
            }
        });
    }

    /// Route an agent response to its waiting task.
    ///
    /// Unknown, late, and duplicate ids are logged and reported as
    /// [`IngestError::UnknownResponseId`]; they never affect other tasks.
    pub fn resolve_from_response(&self, response: TaskResponse) -> Result<(), IngestError> {
        let Some(entry) = self.take(&response.id) else {
            tracing::debug!(task_id = %response.id, "response for unknown task id, discarding");
            return Err(IngestError::UnknownResponseId(response.id));
        };

        tracing::info!(task_id = %response.id, success = response.success, "task completed");
        if response.success {
            entry
                .resolver
                .resolve(response.data.unwrap_or(serde_json::Value::Null));
        } else {
            let message = response
                .error
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            entry.resolver.reject(TaskFailure::Remote(message));
        }
        Ok(())
    }

    /// Remove a pending task without writing its result. The waiter observes
    /// [`TaskFailure::Abandoned`]. Returns `false` if the task had already
    /// been resolved, rejected, or cancelled.
    pub fn cancel(&self, id: &str) -> bool {
        match self.take(id) {
            Some(entry) => {
                tracing::debug!(task_id = %id, "pending task cancelled");
                drop(entry.resolver);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task. Used on shutdown.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<PendingEntry> = self.pending.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.timer.cancel();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "abandoned pending tasks");
        }
        drained.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Atomically remove an entry and disarm its timer. The lock is released
    /// before the caller writes the result slot.
    fn take(&self, id: &str) -> Option<PendingEntry> {
        let entry = self.pending.lock().remove(id)?;
        entry.timer.cancel();
        Some(entry)
    }
}

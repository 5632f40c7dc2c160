//! Correlated request units and their single-assignment result slots.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::protocol::TaskRequest;

/// Why a task finished without a success payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    /// The agent reported a failure. Carries the agent's message verbatim.
    #[error("{0}")]
    Remote(String),
    /// No response arrived within the bound.
    #[error("Task {id} timed out after {}", format_duration(.after))]
    TimedOut { id: String, after: Duration },
    /// The slot was dropped without ever being written (caller cancellation
    /// or shutdown).
    #[error("Task {0} was abandoned before a response arrived")]
    Abandoned(String),
}

pub type TaskOutcome = Result<Value, TaskFailure>;

/// A single request to be executed by an agent.
///
/// The write half of the result slot is handed out exactly once through
/// [`Task::take_resolver`]; the read half is consumed by
/// [`Task::await_result`].
#[derive(Debug)]
pub struct Task {
    id: String,
    operation: String,
    params: Value,
    resolver: Option<Resolver>,
    outcome_rx: oneshot::Receiver<TaskOutcome>,
}

impl Task {
    pub fn new(operation: impl Into<String>, params: Value) -> Self {
        let id = Uuid::new_v4().to_string();
        let (tx, outcome_rx) = oneshot::channel();
        Self {
            resolver: Some(Resolver {
                task_id: id.clone(),
                tx,
            }),
            id,
            operation: operation.into(),
            params,
            outcome_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Build the wire record for this task.
    pub fn to_request(&self) -> TaskRequest {
        TaskRequest {
            id: self.id.clone(),
            task: self.operation.clone(),
            params: self.params.clone(),
        }
    }

    /// Take the write half of the result slot. Returns `None` on every call
    /// after the first.
    pub fn take_resolver(&mut self) -> Option<Resolver> {
        self.resolver.take()
    }

    /// Suspend until the task is resolved or rejected.
    pub async fn await_result(self) -> TaskOutcome {
        let Self { id, resolver, outcome_rx, .. } = self;
        // Dropping an untaken resolver here closes the slot instead of
        // waiting forever.
        drop(resolver);
        match outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskFailure::Abandoned(id)),
        }
    }
}

/// Write half of a task's result slot. Writing consumes it, so a slot can
/// be written at most once.
#[derive(Debug)]
pub struct Resolver {
    task_id: String,
    tx: oneshot::Sender<TaskOutcome>,
}

impl Resolver {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn resolve(self, data: Value) {
        self.complete(Ok(data));
    }

    pub fn reject(self, failure: TaskFailure) {
        self.complete(Err(failure));
    }

    fn complete(self, outcome: TaskOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!(task_id = %self.task_id, "task waiter already gone, outcome dropped");
        }
    }
}

/// Render a duration the way timeout messages report it: whole seconds when
/// exact, milliseconds otherwise.
pub fn format_duration(d: &Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{} seconds", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

//! Public entry point: execute a task against whatever agents are connected
//! and return a single result or a single failure.
//!
//! Requests are broadcast to every open agent connection. Normally exactly
//! one agent answers; if several do, the first response for a task id is
//! delivered to the caller and every later one is discarded.

use std::time::Duration;

use serde_json::Value;

use crate::correlator::Correlator;
use crate::error::{BridgeError, IngestError};
use crate::protocol::TaskResponse;
use crate::registry::ConnectionRegistry;
use crate::task::Task;

/// Default bound on how long a dispatched task may wait for its response.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Bridge {
    registry: ConnectionRegistry,
    correlator: Correlator,
    default_timeout: Duration,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}

impl Bridge {
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_parts(ConnectionRegistry::new(), Correlator::new(), default_timeout)
    }

    pub fn with_parts(
        registry: ConnectionRegistry,
        correlator: Correlator,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            correlator,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn agent_count(&self) -> usize {
        self.registry.open_count()
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Run `operation` with the configured default timeout.
    pub async fn execute_operation(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        self.execute(Task::new(operation, params), self.default_timeout)
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        operation: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.execute(Task::new(operation, params), timeout).await
    }

    /// Dispatch `task` to all connected agents and wait for its outcome.
    ///
    /// If the returned future is dropped before completion the pending entry
    /// is removed and its timer disarmed.
    pub async fn execute(&self, task: Task, timeout: Duration) -> Result<Value, BridgeError> {
        if self.registry.open_count() == 0 {
            tracing::warn!(task = task.operation(), "no agent connected");
            return Err(BridgeError::NoAgentConnected);
        }
        self.dispatch(task, timeout).await
    }

    /// Register `task`, broadcast it and wait. A broadcast that reaches no
    /// connection means every channel closed after the reachability check.
    async fn dispatch(&self, mut task: Task, timeout: Duration) -> Result<Value, BridgeError> {
        let frame = task.to_request().to_bytes().map_err(|e| {
            tracing::error!(task_id = %task.id(), error = %e, "failed to serialize task request");
            BridgeError::SendFailed
        })?;
        let Some(resolver) = task.take_resolver() else {
            tracing::warn!(task_id = %task.id(), "task was already dispatched");
            return Err(BridgeError::SendFailed);
        };

        let id = task.id().to_string();
        self.correlator.register(resolver, timeout);
        let guard = PendingGuard {
            correlator: &self.correlator,
            id: &id,
        };

        let sent = self.registry.broadcast(frame);
        if sent == 0 {
            tracing::warn!(task_id = %id, "task could not be delivered to any agent");
            drop(guard);
            return Err(BridgeError::SendFailed);
        }
        tracing::info!(task_id = %id, task = task.operation(), sent, "task dispatched");

        let outcome = task.await_result().await;
        // The entry is gone once an outcome exists, so this cancel is a no-op.
        drop(guard);
        outcome.map_err(BridgeError::from)
    }

    /// Feed one inbound agent message into the correlator.
    ///
    /// Malformed input and responses for unknown ids are logged and
    /// returned as [`IngestError`]; neither affects pending tasks.
    pub fn handle_incoming(&self, bytes: &[u8]) -> Result<(), IngestError> {
        let response = TaskResponse::from_slice(bytes).map_err(|e| {
            tracing::warn!(
                error = %e,
                message = %String::from_utf8_lossy(&bytes[..bytes.len().min(256)]),
                "failed to parse agent message"
            );
            IngestError::MalformedResponse(e)
        })?;
        self.correlator.resolve_from_response(response)
    }
}

/// Removes a task's pending entry if the surrounding future is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.cancel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentConnection;
    use crate::protocol::TaskRequest;
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn attach_agent(bridge: &Bridge) -> mpsc::UnboundedReceiver<Bytes> {
        let (conn, rx) = AgentConnection::new(bridge.registry());
        bridge.registry().register(conn);
        rx
    }

    /// Spawn a fake agent that answers every request via `reply`.
    fn spawn_agent<F>(bridge: &Bridge, mut rx: mpsc::UnboundedReceiver<Bytes>, reply: F)
    where
        F: Fn(TaskRequest) -> Option<String> + Send + 'static,
    {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let request: TaskRequest = serde_json::from_slice(&frame).unwrap();
                if let Some(response) = reply(request) {
                    let _ = bridge.handle_incoming(response.as_bytes());
                }
            }
        });
    }

    #[tokio::test]
    async fn no_agent_fails_fast_without_registration() {
        let bridge = Bridge::default();
        let started = std::time::Instant::now();
        let err = bridge
            .execute_operation("printText", json!({ "text": "hi" }))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::NoAgentConnected);
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn round_trip_success() {
        let bridge = Bridge::default();
        let rx = attach_agent(&bridge);
        spawn_agent(&bridge, rx, |req| {
            assert_eq!(req.task, "executeCode");
            Some(json!({ "id": req.id, "success": true, "data": { "result": 7 } }).to_string())
        });

        let data = bridge
            .execute_operation("executeCode", json!({ "code": "return 7;" }))
            .await
            .unwrap();
        assert_eq!(data, json!({ "result": 7 }));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_failure_is_translated() {
        let bridge = Bridge::default();
        let rx = attach_agent(&bridge);
        spawn_agent(&bridge, rx, |req| {
            Some(json!({ "id": req.id, "success": false, "error": "Unknown task type: bogus" }).to_string())
        });

        let err = bridge.execute_operation("bogus", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::RemoteExecutionFailed("Unknown task type: bogus".into())
        );
    }

    #[tokio::test]
    async fn silent_agent_times_out() {
        let bridge = Bridge::default();
        let _rx = attach_agent(&bridge);

        let timeout = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let err = bridge
            .execute_with_timeout("printText", json!({ "text": "x" }), timeout)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BridgeError::Timeout { duration, .. } if duration == timeout));
        assert!(err.to_string().contains("50ms"));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn all_channels_closed_rolls_back_with_send_failed() {
        let bridge = Bridge::default();
        let rx = attach_agent(&bridge);
        // The transport went away after the reachability check passed.
        drop(rx);

        let err = bridge
            .dispatch(Task::new("printText", json!({ "text": "x" })), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::SendFailed);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn slow_agent_queue_never_reports_send_failed() {
        let bridge = Bridge::default();
        let rx = attach_agent(&bridge);

        // Nothing drains the queue until every call has been dispatched.
        let calls: Vec<_> = (0..100u64)
            .map(|n| {
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    bridge
                        .execute_with_timeout("executeCode", json!({ "n": n }), Duration::from_secs(5))
                        .await
                })
            })
            .collect();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while bridge.pending_count() < 100 {
            assert!(tokio::time::Instant::now() < deadline, "calls were not all dispatched");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        spawn_agent(&bridge, rx, |req| {
            Some(json!({ "id": req.id, "success": true, "data": req.params["n"] }).to_string())
        });
        for (n, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap(), Ok(json!(n as u64)));
        }
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn fan_out_succeeds_when_one_of_three_is_writable() {
        let bridge = Bridge::default();
        let live = attach_agent(&bridge);
        let dead_a = attach_agent(&bridge);
        let dead_b = attach_agent(&bridge);
        drop(dead_a);
        drop(dead_b);
        // Closed channels stay registered until their transport unregisters
        // them, but the open one still counts.
        assert_eq!(bridge.registry().len(), 3);

        spawn_agent(&bridge, live, |req| {
            Some(json!({ "id": req.id, "success": true, "data": "ok" }).to_string())
        });

        let data = bridge.execute_operation("printText", json!({})).await.unwrap();
        assert_eq!(data, json!("ok"));
    }

    #[tokio::test]
    async fn every_agent_receives_the_request() {
        let bridge = Bridge::default();
        let mut receivers: Vec<_> = (0..3).map(|_| attach_agent(&bridge)).collect();

        let caller = bridge.clone();
        let call = tokio::spawn(async move {
            caller
                .execute_with_timeout("printText", json!({ "text": "a" }), Duration::from_secs(5))
                .await
        });

        let mut ids = Vec::new();
        for rx in receivers.iter_mut() {
            let frame = rx.recv().await.unwrap();
            let req: TaskRequest = serde_json::from_slice(&frame).unwrap();
            ids.push(req.id);
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        // First agent answers success, second answers failure late.
        bridge
            .handle_incoming(json!({ "id": ids[0], "success": true, "data": 1 }).to_string().as_bytes())
            .unwrap();
        assert!(bridge
            .handle_incoming(json!({ "id": ids[1], "success": false, "error": "dup" }).to_string().as_bytes())
            .is_err());

        assert_eq!(call.await.unwrap(), Ok(json!(1)));
    }

    #[tokio::test]
    async fn malformed_input_leaves_pending_tasks_intact() {
        let bridge = Bridge::default();
        let mut rx = attach_agent(&bridge);

        let caller = bridge.clone();
        let call = tokio::spawn(async move {
            caller
                .execute_with_timeout("executeCode", json!({}), Duration::from_secs(5))
                .await
        });
        let frame = rx.recv().await.unwrap();
        let req: TaskRequest = serde_json::from_slice(&frame).unwrap();

        assert!(matches!(
            bridge.handle_incoming(b"{{{ not json"),
            Err(IngestError::MalformedResponse(_))
        ));
        assert!(matches!(
            bridge.handle_incoming(br#"{"id": 5, "ok": true}"#),
            Err(IngestError::MalformedResponse(_))
        ));
        assert_eq!(bridge.pending_count(), 1);

        bridge
            .handle_incoming(json!({ "id": req.id, "success": true }).to_string().as_bytes())
            .unwrap();
        assert_eq!(call.await.unwrap(), Ok(Value::Null));
    }

    #[tokio::test]
    async fn dropped_call_cleans_up_pending_entry() {
        let bridge = Bridge::default();
        let mut rx = attach_agent(&bridge);

        let caller = bridge.clone();
        let call = tokio::spawn(async move {
            caller
                .execute_with_timeout("executeCode", json!({}), Duration::from_secs(30))
                .await
        });
        rx.recv().await.unwrap();
        assert_eq!(bridge.pending_count(), 1);

        call.abort();
        let _ = call.await;
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_leave_no_pending_entries() {
        let bridge = Bridge::default();
        let rx = attach_agent(&bridge);
        // Answer even-numbered requests with success, odd with failure, and
        // ignore every request whose params ask for silence.
        spawn_agent(&bridge, rx, |req| {
            if req.params["silent"] == json!(true) {
                return None;
            }
            let n = req.params["n"].as_u64().unwrap_or(0);
            let response = if n % 2 == 0 {
                json!({ "id": req.id, "success": true, "data": n })
            } else {
                json!({ "id": req.id, "success": false, "error": format!("odd {n}") })
            };
            Some(response.to_string())
        });

        let baseline = bridge.pending_count();
        let calls: Vec<_> = (0..48u64)
            .map(|n| {
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    let params = json!({ "n": n, "silent": n % 8 == 7 });
                    bridge
                        .execute_with_timeout("executeCode", params, Duration::from_millis(200))
                        .await
                })
            })
            .collect();

        for (n, call) in calls.into_iter().enumerate() {
            let n = n as u64;
            match call.await.unwrap() {
                Ok(v) => assert_eq!(v, json!(n)),
                Err(BridgeError::RemoteExecutionFailed(msg)) => assert_eq!(msg, format!("odd {n}")),
                Err(BridgeError::Timeout { .. }) => assert_eq!(n % 8, 7),
                Err(other) => panic!("unexpected error for {n}: {other}"),
            }
        }
        assert_eq!(bridge.pending_count(), baseline);
    }
}

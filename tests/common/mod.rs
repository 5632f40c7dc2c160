#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use agent_bridge::api::{self, AppState};
use agent_bridge::bridge::Bridge;
use agent_bridge::repl;
use agent_bridge::shutdown::ShutdownCoordinator;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// All three listeners bound to ephemeral localhost ports.
pub struct TestServer {
    pub bridge: Bridge,
    pub shutdown: ShutdownCoordinator,
    pub mcp_addr: SocketAddr,
    pub agent_addr: SocketAddr,
    pub repl_addr: SocketAddr,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_timeout(Duration::from_secs(5)).await
    }

    pub async fn start_with_timeout(task_timeout: Duration) -> Self {
        let bridge = Bridge::new(task_timeout);
        let shutdown = ShutdownCoordinator::new();
        let state = AppState::new(bridge.clone(), shutdown.clone());

        let mcp_addr = serve(api::router(state.clone())).await;
        let agent_addr = serve(api::agent_router(state.clone())).await;
        let repl_addr = serve(repl::router(state)).await;

        Self {
            bridge,
            shutdown,
            mcp_addr,
            agent_addr,
            repl_addr,
        }
    }

    pub async fn connect_agent(&self) -> FakeAgent {
        let expected = self.bridge.agent_count() + 1;
        let agent = FakeAgent::connect(self.agent_addr, "/ws").await;
        wait_for_agents(&self.bridge, expected).await;
        agent
    }
}

async fn serve(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Poll until the bridge sees exactly `n` open agents.
pub async fn wait_for_agents(bridge: &Bridge, n: usize) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while bridge.agent_count() != n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {n} agents, have {}",
            bridge.agent_count()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the bridge has no pending tasks.
pub async fn wait_for_no_pending(bridge: &Bridge) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while bridge.pending_count() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "still {} pending tasks",
            bridge.pending_count()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A scripted stand-in for the plugin: reads task requests and writes
/// whatever responses the test chooses.
pub struct FakeAgent {
    tx: SplitSink<WsStream, Message>,
    rx: SplitStream<WsStream>,
}

impl FakeAgent {
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        let url = format!("ws://{addr}{path}");
        let (stream, _response) = timeout(RECV_TIMEOUT, connect_async(&url))
            .await
            .expect("WebSocket connect should not timeout")
            .expect("WebSocket connect should succeed");
        let (tx, rx) = stream.split();
        Self { tx, rx }
    }

    /// Next message from the bridge, or `None` if the socket closed.
    pub async fn next_message(&mut self) -> Option<Message> {
        match timeout(RECV_TIMEOUT, self.rx.next()).await {
            Ok(Some(Ok(msg))) => Some(msg),
            Ok(Some(Err(_))) | Ok(None) => None,
            Err(_) => panic!("timed out waiting for message from bridge"),
        }
    }

    /// Next task request, parsed.
    pub async fn next_request(&mut self) -> Value {
        loop {
            match self.next_message().await {
                Some(Message::Text(text)) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
                other => panic!("expected task request, got {other:?}"),
            }
        }
    }

    /// Assert that nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(msg)) = timeout(wait, self.rx.next()).await {
            panic!("expected no message, got {msg:?}");
        }
    }

    pub async fn send_text(&mut self, text: impl Into<String>) {
        let text: String = text.into();
        self.tx.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.tx.send(Message::Binary(data.into())).await.unwrap();
    }

    pub async fn send_json(&mut self, value: &Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn respond_success(&mut self, id: &str, data: Value) {
        self.send_json(&json!({ "id": id, "success": true, "data": data }))
            .await;
    }

    pub async fn respond_failure(&mut self, id: &str, error: &str) {
        self.send_json(&json!({ "id": id, "success": false, "error": error }))
            .await;
    }

    pub async fn close(mut self) {
        let _ = self.tx.send(Message::Close(None)).await;
        let _ = self.tx.flush().await;
    }

    /// Answer every request with `handler(request)` until the socket closes.
    pub fn spawn_responder<F>(mut self, handler: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&Value) -> Value + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(Ok(msg)) = self.rx.next().await {
                if let Message::Text(text) = msg {
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    let response = handler(&request);
                    if self.tx.send(Message::Text(response.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        })
    }
}

// ── MCP helpers ────────────────────────────────────────────────────

/// Extract the JSON-RPC response from an SSE event stream body.
pub fn extract_jsonrpc_from_sse(body: &str) -> Value {
    for event in body.split("\n\n").collect::<Vec<_>>().iter().rev() {
        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if let Ok(json) = serde_json::from_str::<Value>(data) {
                    if json.get("jsonrpc").is_some() {
                        return json;
                    }
                }
            }
        }
    }
    panic!("No JSON-RPC response found in SSE body:\n{body}");
}

/// An initialized MCP session against a test server.
pub struct McpSession {
    client: reqwest::Client,
    addr: SocketAddr,
    session_id: String,
    next_id: u64,
}

impl McpSession {
    pub async fn initialize(addr: SocketAddr) -> (Self, Value) {
        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{addr}/mcp"))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test","version":"0.1"}}}"#,
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let session_id = response
            .headers()
            .get("mcp-session-id")
            .expect("initialize response should have Mcp-Session-Id header")
            .to_str()
            .unwrap()
            .to_string();
        let init = extract_jsonrpc_from_sse(&response.text().await.unwrap());

        let session = Self {
            client,
            addr,
            session_id,
            next_id: 2,
        };
        session
            .post(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await;
        (session, init)
    }

    async fn post(&self, body: String) -> reqwest::Response {
        self.client
            .post(format!("http://{}/mcp", self.addr))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("Mcp-Session-Id", &self.session_id)
            .body(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let response = self.post(body.to_string()).await;
        assert_eq!(response.status(), 200, "MCP endpoint should return 200 OK");
        let json = extract_jsonrpc_from_sse(&response.text().await.unwrap());
        assert_eq!(json["id"], id);
        json
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        self.request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }
}

/// Text of the first content item of a tool result.
pub fn tool_text(json: &Value) -> &str {
    json["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("no text content in {json}"))
}

pub fn is_tool_error(json: &Value) -> bool {
    json["result"]["isError"] == true
}

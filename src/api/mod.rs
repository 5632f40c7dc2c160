mod agent_ws;
pub mod error;
mod handlers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue},
    routing::get,
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::bridge::Bridge;
use crate::shutdown::ShutdownCoordinator;

use handlers::*;

/// Maximum concurrent MCP sessions allowed via the Streamable HTTP transport.
const MAX_MCP_SESSIONS: usize = 256;

/// Largest request body accepted on the HTTP listeners. Image imports are
/// read from disk, not uploaded, so this only bounds code and JSON-RPC.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub shutdown: ShutdownCoordinator,
    /// Counter for active MCP sessions (Streamable HTTP transport).
    pub mcp_session_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(bridge: Bridge, shutdown: ShutdownCoordinator) -> Self {
        Self {
            bridge,
            shutdown,
            mcp_session_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// The MCP listener: health, status, and the Streamable HTTP endpoint.
pub fn router(state: AppState) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let mcp_state = state.clone();
    let mcp_counter = state.mcp_session_count.clone();
    let mcp_service = StreamableHttpService::new(
        move || {
            let current = mcp_counter.fetch_add(1, Ordering::AcqRel);
            if current >= MAX_MCP_SESSIONS {
                mcp_counter.fetch_sub(1, Ordering::Release);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "maximum MCP sessions reached",
                ));
            }
            Ok(crate::mcp::AgentBridgeMcpServer::new(mcp_state.bridge.clone())
                .with_session_counter(mcp_counter.clone()))
        },
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .nest_service("/mcp", mcp_service)
        .with_state(state);
    with_common_layers(router)
}

/// The agent listener: a WebSocket upgrade at `/` and `/ws`.
pub fn agent_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(agent_ws::agent_ws))
        .route("/ws", get(agent_ws::agent_ws))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub(crate) fn with_common_layers(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
}

use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub(super) struct StatusResponse {
    agents: usize,
    pending_tasks: usize,
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        agents: state.bridge.agent_count(),
        pending_tasks: state.bridge.pending_count(),
    })
}

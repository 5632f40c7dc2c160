//! Browser console for running `executeCode` tasks by hand.

use axum::{
    extract::State,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::AppState;

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/execute", post(execute))
        .with_state(state);
    crate::api::with_common_layers(router)
}

async fn index() -> Html<&'static str> {
    Html(REPL_PAGE)
}

async fn execute(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let request: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidRequest(format!("body is not valid JSON: {e}")))?;
    let code = match request.get("code") {
        Some(Value::String(code)) if !code.is_empty() => code.clone(),
        _ => {
            return Err(ApiError::InvalidRequest(
                "code is required and must be a non-empty string".into(),
            ))
        }
    };

    tracing::debug!(code_len = code.len(), "repl execute");
    let data = state
        .bridge
        .execute_operation("executeCode", json!({ "code": code }))
        .await?;

    Ok(Json(json!({
        "success": true,
        "result": data.get("result").cloned().unwrap_or(Value::Null),
        "log": data.get("log").and_then(Value::as_str).unwrap_or(""),
    })))
}

const REPL_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>agent-bridge REPL</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; max-width: 60rem; }
  textarea { width: 100%; height: 14rem; font-family: ui-monospace, monospace; font-size: 0.9rem; }
  pre { background: #f4f4f4; padding: 0.75rem; white-space: pre-wrap; min-height: 2rem; }
  .error { color: #b00020; }
</style>
</head>
<body>
<h1>agent-bridge REPL</h1>
<p>Code runs in the connected plugin. Press Ctrl+Enter or click Execute.</p>
<textarea id="code" spellcheck="false">return penpot.selection.map(s => s.name);</textarea>
<p><button id="run">Execute</button></p>
<h2>Result</h2>
<pre id="result"></pre>
<h2>Log</h2>
<pre id="log"></pre>
<script>
const code = document.getElementById("code");
const result = document.getElementById("result");
const log = document.getElementById("log");

async function run() {
  result.className = "";
  result.textContent = "running...";
  log.textContent = "";
  try {
    const resp = await fetch("/execute", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ code: code.value }),
    });
    const body = await resp.json();
    if (resp.ok) {
      result.textContent = JSON.stringify(body.result, null, 2) ?? "undefined";
      log.textContent = body.log;
    } else {
      result.className = "error";
      result.textContent = body.error ? body.error.message : resp.statusText;
    }
  } catch (e) {
    result.className = "error";
    result.textContent = String(e);
  }
}

document.getElementById("run").addEventListener("click", run);
code.addEventListener("keydown", (e) => {
  if (e.key === "Enter" && (e.ctrlKey || e.metaKey)) {
    e.preventDefault();
    run();
  }
});
</script>
</body>
</html>
"#;

pub mod tools;

use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::Engine;
use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::files::{self, FileError};

use tools::{
    ExecuteCodeParams, ExportFormat, ExportShapeParams, HelloWorldParams, ImportImageParams,
    PrintTextParams,
};

/// Failure inside a tool body. Reported to the model as an error result
/// rather than a protocol error.
#[derive(Debug, thiserror::Error)]
enum ToolError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    File(#[from] FileError),
}

fn tool_failure(message: impl Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!(
        "Tool execution failed: {message}"
    ))])
}

fn finish(tool: &str, result: Result<CallToolResult, ToolError>) -> Result<CallToolResult, ErrorData> {
    Ok(result.unwrap_or_else(|e| {
        tracing::warn!(tool, error = %e, "tool failed");
        tool_failure(e)
    }))
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ErrorData> {
    if value.is_empty() {
        return Err(ErrorData::invalid_params(
            format!("{field} cannot be empty"),
            None,
        ));
    }
    Ok(())
}

/// Decrements the shared session counter once every clone of a server is gone.
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

// ── MCP server ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AgentBridgeMcpServer {
    bridge: Bridge,
    tool_router: ToolRouter<AgentBridgeMcpServer>,
    _session_slot: Option<Arc<SessionSlot>>,
}

impl AgentBridgeMcpServer {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            tool_router: Self::tool_router(),
            _session_slot: None,
        }
    }

    /// Attach a shared session counter that is decremented when this server
    /// is dropped.
    pub fn with_session_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self._session_slot = Some(Arc::new(SessionSlot(counter)));
        self
    }

    async fn run_script(&self, code: String) -> Result<Value, BridgeError> {
        self.bridge
            .execute_operation("executeCode", json!({ "code": code }))
            .await
    }

    async fn export_shape_inner(&self, params: ExportShapeParams) -> Result<CallToolResult, ToolError> {
        let file_path = params.file_path.as_deref().map(Path::new);
        if let Some(path) = file_path {
            files::ensure_absolute(path)?;
        }

        let data = self
            .run_script(tools::export_script(&params.shape_id, params.format))
            .await?;
        let image = data.get("result").cloned().unwrap_or(Value::Null);

        let content = match params.format {
            ExportFormat::Png => {
                let bytes = files::decode_image_bytes(&image)?;
                match file_path {
                    Some(path) => {
                        files::write_file(path, &bytes).await?;
                        None
                    }
                    None => Some(Content::image(
                        base64::engine::general_purpose::STANDARD.encode(&bytes),
                        "image/png",
                    )),
                }
            }
            ExportFormat::Svg => {
                let svg = match image {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                match file_path {
                    Some(path) => {
                        files::write_file(path, svg.as_bytes()).await?;
                        None
                    }
                    None => Some(Content::text(svg)),
                }
            }
        };

        let content = content.unwrap_or_else(|| {
            Content::text(format!(
                "The shape has been exported to {}",
                params.file_path.unwrap_or_default()
            ))
        });
        Ok(CallToolResult::success(vec![content]))
    }

    async fn import_image_inner(&self, params: ImportImageParams) -> Result<CallToolResult, ToolError> {
        let image = files::read_image(Path::new(&params.file_path)).await?;
        tracing::debug!(
            file = %image.file_name,
            mime = %image.mime_type,
            encoded_len = image.base64.len(),
            "importing image"
        );
        self.run_script(tools::import_script(&image, &params)).await?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Image imported successfully from {}",
            params.file_path
        ))]))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for AgentBridgeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "agent-bridge".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Dispatches tool calls as tasks to a connected design-tool plugin and \
                     returns its results."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Tools other than hello_world require the plugin to be running and connected. \
                 Use execute_code for general scripting against the design API, export_shape to \
                 see or save a shape, and import_image to place a local image."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl AgentBridgeMcpServer {
    #[tool(description = "Returns a personalized greeting message with the provided name.")]
    async fn hello_world(
        &self,
        Parameters(params): Parameters<HelloWorldParams>,
    ) -> Result<CallToolResult, ErrorData> {
        require_non_empty("name", &params.name)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Hello, {}! This greeting was generated by agent-bridge.",
            params.name
        ))]))
    }

    #[tool(description = "Creates text in the design at the viewport center and selects it.")]
    async fn print_text(
        &self,
        Parameters(params): Parameters<PrintTextParams>,
    ) -> Result<CallToolResult, ErrorData> {
        require_non_empty("text", &params.text)?;
        let result = self
            .bridge
            .execute_operation("printText", json!({ "text": params.text }))
            .await
            .map(|_| {
                CallToolResult::success(vec![Content::text(format!(
                    "Successfully created text \"{}\".",
                    params.text
                ))])
            })
            .map_err(ToolError::from);
        finish("print_text", result)
    }

    #[tool(description = "Executes JavaScript code in the plugin context. The `penpot` API object and a persistent `storage` object are available. Returns the value of the concluding return statement, if any, plus any captured log output.")]
    async fn execute_code(
        &self,
        Parameters(params): Parameters<ExecuteCodeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        require_non_empty("code", &params.code)?;
        let result = self.run_script(params.code)
            .await
            .map(|data| {
                CallToolResult::success(vec![Content::text(tools::format_execute_result(&data))])
            })
            .map_err(ToolError::from);
        finish("execute_code", result)
    }

    #[tool(description = "Exports a shape to a PNG or SVG image so you can see what it looks like. Alternatively saves it to an absolute file path.")]
    async fn export_shape(
        &self,
        Parameters(params): Parameters<ExportShapeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        require_non_empty("shape_id", &params.shape_id)?;
        finish("export_shape", self.export_shape_inner(params).await)
    }

    #[tool(description = "Imports a local image file (JPG, PNG, GIF, WEBP or BMP) by creating a rectangle that uses the image as a fill. Keeps the image's proportions unless both width and height are given.")]
    async fn import_image(
        &self,
        Parameters(params): Parameters<ImportImageParams>,
    ) -> Result<CallToolResult, ErrorData> {
        params
            .validate()
            .map_err(|msg| ErrorData::invalid_params(msg, None))?;
        finish("import_image", self.import_image_inner(params).await)
    }
}

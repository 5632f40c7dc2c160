// MCP tool parameter types and helpers

use serde::Deserialize;
use serde_json::Value;

use crate::files::ImageFile;

/// Parameters for the `hello_world` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct HelloWorldParams {
    #[schemars(description = "The name to greet.")]
    pub name: String,
}

/// Parameters for the `print_text` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PrintTextParams {
    #[schemars(description = "The text to create in the design at the viewport center.")]
    pub text: String,
}

/// Parameters for the `execute_code` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteCodeParams {
    #[schemars(description = "JavaScript code to run in the plugin context. The value of a concluding return statement is returned.")]
    pub code: String,
}

/// Output format for `export_shape`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Svg,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Svg => "svg",
        }
    }
}

/// Parameters for the `export_shape` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExportShapeParams {
    /// Shape identifier, or `selection` for the first selected shape.
    #[schemars(description = "Identifier of the shape to export. Use the special identifier 'selection' to export the first shape currently selected by the user.")]
    pub shape_id: String,

    #[serde(default)]
    #[schemars(description = "The output format, either png (default) or svg.")]
    pub format: ExportFormat,

    #[schemars(description = "Optional absolute file path to save the exported image to. If omitted, the image data is returned directly.")]
    pub file_path: Option<String>,
}

/// Parameters for the `import_image` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ImportImageParams {
    #[schemars(description = "Absolute path to the image file to import.")]
    pub file_path: String,

    #[schemars(description = "Optional X coordinate for the rectangle's position.")]
    pub x: Option<f64>,

    #[schemars(description = "Optional Y coordinate for the rectangle's position.")]
    pub y: Option<f64>,

    #[schemars(description = "Optional width. If only width is provided, height keeps the image's aspect ratio.")]
    pub width: Option<f64>,

    #[schemars(description = "Optional height. If only height is provided, width keeps the image's aspect ratio.")]
    pub height: Option<f64>,
}

impl ImportImageParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.file_path.is_empty() {
            return Err("file_path cannot be empty".into());
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if matches!(value, Some(v) if !(v > 0.0)) {
                return Err(format!("{name} must be positive"));
            }
        }
        for (name, value) in [("x", self.x), ("y", self.y)] {
            if matches!(value, Some(v) if !v.is_finite()) {
                return Err(format!("{name} must be a finite number"));
            }
        }
        Ok(())
    }
}

/// Quote a string as a JavaScript string literal. JSON string syntax is a
/// subset of JavaScript's.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Script that exports a shape and returns its image data.
pub fn export_script(shape_id: &str, format: ExportFormat) -> String {
    let shape = if shape_id == "selection" {
        "penpot.selection[0]".to_string()
    } else {
        format!("penpotUtils.findShapeById({})", js_string(shape_id))
    };
    format!(
        "return {shape}.export({{\"type\": \"{}\"}});",
        format.as_str()
    )
}

/// Script that uploads an image and places it as the fill of a new rectangle.
pub fn import_script(image: &ImageFile, params: &ImportImageParams) -> String {
    let opt = |v: Option<f64>| v.map_or_else(|| "null".to_string(), |n| n.to_string());
    let name = js_string(&image.file_name);
    let mut script = format!(
        r#"
const bytes = penpotUtils.atob({data});
const imageData = await penpot.uploadMediaData({name}, bytes, {mime});
const rect = penpot.createRectangle();
rect.name = {name};
const width = {width};
const height = {height};
let rectWidth, rectHeight;
if (width !== null && height !== null) {{
    rectWidth = width;
    rectHeight = height;
}} else if (width !== null) {{
    rectWidth = width;
    rectHeight = width * (imageData.height / imageData.width);
}} else if (height !== null) {{
    rectHeight = height;
    rectWidth = height * (imageData.width / imageData.height);
}} else {{
    rectWidth = imageData.width;
    rectHeight = imageData.height;
}}
rect.resize(rectWidth, rectHeight);
"#,
        data = js_string(&image.base64),
        mime = js_string(&image.mime_type),
        width = opt(params.width),
        height = opt(params.height),
    );
    if let Some(x) = params.x {
        script.push_str(&format!("rect.x = {x};\n"));
    }
    if let Some(y) = params.y {
        script.push_str(&format!("rect.y = {y};\n"));
    }
    script.push_str("rect.fills = [{ fillOpacity: 1, fillImage: imageData }];\n");
    script.push_str("return { shapeId: rect.id };\n");
    script
}

/// Text reported for a completed `executeCode` task.
pub fn format_execute_result(data: &Value) -> String {
    let mut text = match data.get("result") {
        Some(result) if !result.is_null() => format!(
            "Code executed successfully. Result: {}",
            serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
        ),
        _ => "Code executed successfully with no return value.".to_string(),
    };
    if let Some(log) = data.get("log").and_then(Value::as_str) {
        if !log.is_empty() {
            text.push_str("\n\nLog output:\n");
            text.push_str(log);
        }
    }
    text
}

//! Local file helpers used by the export and import tools.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde_json::Value;

/// Image extensions accepted by `import_image`.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("The specified file path must be absolute: {}", .0.display())]
    NotAbsolute(PathBuf),
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error(
        "Unsupported image format: {0}. Supported formats (file extensions): .jpg, .jpeg, .png, .gif, .webp, .bmp"
    )]
    UnsupportedImage(String),
    #[error("invalid image data: {0}")]
    InvalidImageData(String),
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn ensure_absolute(path: &Path) -> Result<(), FileError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(FileError::NotAbsolute(path.to_path_buf()))
    }
}

/// Write `contents` to `path`, creating parent directories as needed.
pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), FileError> {
    ensure_absolute(path)?;
    let io_err = |source| FileError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(io_err)?;
    tracing::debug!(path = %path.display(), "wrote file");
    Ok(())
}

/// An image file read from disk, ready to be shipped to the agent.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub mime_type: String,
    pub base64: String,
}

/// Read an image from an absolute path and base64-encode it.
pub async fn read_image(path: &Path) -> Result<ImageFile, FileError> {
    ensure_absolute(path)?;
    let mime_type = image_mime_type(path)?;
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FileError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(FileError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ImageFile {
        file_name,
        mime_type,
        base64: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// MIME type for a supported image extension.
pub fn image_mime_type(path: &Path) -> Result<String, FileError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(FileError::UnsupportedImage(format!(".{ext}")));
    }
    mime_guess::from_ext(&ext)
        .first()
        .map(|m| m.essence_str().to_string())
        .ok_or_else(|| FileError::UnsupportedImage(format!(".{ext}")))
}

/// Decode image bytes returned by the agent.
///
/// The agent may send a base64 string, a JSON array of byte values, or an
/// object keyed by index (`{"0": 137, "1": 80, ...}`).
pub fn decode_image_bytes(value: &Value) -> Result<Vec<u8>, FileError> {
    match value {
        Value::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| FileError::InvalidImageData(e.to_string())),
        Value::Array(items) => items.iter().map(byte_value).collect(),
        Value::Object(map) => {
            let mut indexed = map
                .iter()
                .map(|(k, v)| {
                    let index = k
                        .parse::<usize>()
                        .map_err(|_| FileError::InvalidImageData(format!("non-numeric key {k:?}")))?;
                    Ok((index, byte_value(v)?))
                })
                .collect::<Result<Vec<_>, FileError>>()?;
            indexed.sort_unstable_by_key(|(i, _)| *i);
            Ok(indexed.into_iter().map(|(_, b)| b).collect())
        }
        other => Err(FileError::InvalidImageData(format!(
            "expected string, array or object, got {other}"
        ))),
    }
}

fn byte_value(v: &Value) -> Result<u8, FileError> {
    v.as_u64()
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| FileError::InvalidImageData(format!("{v} is not a byte")))
}

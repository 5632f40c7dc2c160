use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::BridgeError;

/// Error type for HTTP handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 503, 504 or 500 depending on the bridge failure.
    Bridge(BridgeError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Bridge(e) if e.is_unreachable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Bridge(BridgeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Bridge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Bridge(e) => e.code(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            // Agent messages are passed through verbatim.
            ApiError::Bridge(e) => e.to_string(),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        ApiError::Bridge(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

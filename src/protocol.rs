//! Wire protocol between the bridge and connected agents.
//!
//! Every message is a single JSON document carried in one WebSocket frame.
//!
//! Bridge → agent (request):
//!
//! ```json
//! { "id": "…", "task": "executeCode", "params": { … } }
//! ```
//!
//! Agent → bridge (response):
//!
//! ```json
//! { "id": "…", "success": true, "data": …, "error": "…" }
//! ```
//!
//! Older plugin builds wrap the outcome in a `result` object
//! (`{ "id": "…", "result": { "success": …, "data": …, "error": … } }`);
//! both shapes decode to the same [`TaskResponse`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request record sent to every connected agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: String,
    pub task: String,
    pub params: Value,
}

impl TaskRequest {
    /// Serialize into the bytes carried by a single text frame.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Response record reported by an agent for a previously broadcast request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResponseRepr")]
pub struct TaskResponse {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResponse {
    pub fn success(id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: id.into(),
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: Option<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error,
        }
    }

    /// Decode a response from raw frame bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Deserialize)]
struct Outcome {
    success: bool,
    data: Option<Value>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResponseRepr {
    Flat {
        id: String,
        success: bool,
        data: Option<Value>,
        error: Option<String>,
    },
    Nested {
        id: String,
        result: Outcome,
    },
}

impl From<ResponseRepr> for TaskResponse {
    fn from(repr: ResponseRepr) -> Self {
        let (id, outcome) = match repr {
            ResponseRepr::Flat {
                id,
                success,
                data,
                error,
            } => (id, Outcome { success, data, error }),
            ResponseRepr::Nested { id, result } => (id, result),
        };
        Self {
            id,
            success: outcome.success,
            data: outcome.data,
            error: outcome.error,
        }
    }
}

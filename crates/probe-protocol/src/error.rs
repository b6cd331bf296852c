//! Error types for the probe protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kind reported for the deliberately failing conformance method.
pub const KIND_RPC_ERROR: &str = "RpcError";

/// Error kind for a method the worker does not implement.
pub const KIND_UNKNOWN_METHOD: &str = "UnknownMethod";

/// Error kind for malformed requests.
pub const KIND_INVALID_REQUEST: &str = "InvalidRequest";

/// Error kind for version negotiation failures.
pub const KIND_UNSUPPORTED_PROTOCOL: &str = "UnsupportedProtocol";

/// Error kind for calls that require authentication.
pub const KIND_UNAUTHENTICATED: &str = "Unauthenticated";

/// Error payload carried by an `error` response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Taxonomy tag naming the error class on the worker side.
    pub kind: String,
    /// Human-readable, single-line message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorPayload {
    /// Create a new error payload.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach machine-readable details.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create an `UnknownMethod` error.
    pub fn unknown_method(method: &str) -> Self {
        Self::new(KIND_UNKNOWN_METHOD, format!("unknown method: {}", method))
            .with_data(serde_json::json!({ "method": method }))
    }

    /// Create an `InvalidRequest` error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(KIND_INVALID_REQUEST, message)
    }

    /// Create an `UnsupportedProtocol` error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::new(
            KIND_UNSUPPORTED_PROTOCOL,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
        )
        .with_data(serde_json::json!({ "requested": version, "min": min, "max": max }))
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors encoding or decoding a frame line.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame line")]
    Empty,

    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_method_payload() {
        let err = ErrorPayload::unknown_method("frobnicate");
        assert_eq!(err.kind, KIND_UNKNOWN_METHOD);
        assert!(err.message.contains("frobnicate"));
        assert_eq!(err.data.unwrap()["method"], "frobnicate");
    }

    #[test]
    fn test_display_includes_kind() {
        let err = ErrorPayload::new(KIND_RPC_ERROR, "boom");
        assert_eq!(err.to_string(), "RpcError: boom");
    }
}

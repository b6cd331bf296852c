//! Request frame types.

use serde::{Deserialize, Serialize};

/// What a request frame carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Opens a call (unary, stream or exchange).
    #[default]
    Call,
    /// One client item of an open exchange.
    Item,
    /// Client half-close of an open exchange.
    End,
}

/// Per-request metadata propagated to the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Bearer token obtained from the authentication handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    /// W3C trace context header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
}

impl CallMetadata {
    /// Returns true if no metadata is set.
    pub fn is_empty(&self) -> bool {
        self.authorization.is_none() && self.traceparent.is_none()
    }
}

/// Request frame envelope, one JSON object per line on the worker's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Protocol version (0 only for the handshake).
    pub protocol_version: i32,
    /// Caller-chosen ID; every response frame echoes it.
    pub request_id: String,
    /// Frame kind.
    #[serde(default)]
    pub kind: RequestKind,
    /// Method name (only meaningful for `call` frames).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Method parameters or exchange item.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Optional propagated metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CallMetadata>,
}

impl RequestFrame {
    /// Create a call frame.
    pub fn call(
        protocol_version: i32,
        request_id: impl Into<String>,
        method: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            protocol_version,
            request_id: request_id.into(),
            kind: RequestKind::Call,
            method: method.into(),
            payload,
            metadata: None,
        }
    }

    /// Create an exchange item frame.
    pub fn item(protocol_version: i32, request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            protocol_version,
            request_id: request_id.into(),
            kind: RequestKind::Item,
            method: String::new(),
            payload,
            metadata: None,
        }
    }

    /// Create an exchange end frame.
    pub fn end(protocol_version: i32, request_id: impl Into<String>) -> Self {
        Self {
            protocol_version,
            request_id: request_id.into(),
            kind: RequestKind::End,
            method: String::new(),
            payload: serde_json::Value::Null,
            metadata: None,
        }
    }

    /// Attach metadata; empty metadata is omitted from the wire.
    pub fn with_metadata(mut self, metadata: CallMetadata) -> Self {
        self.metadata = if metadata.is_empty() { None } else { Some(metadata) };
        self
    }

    /// Get a named parameter from the payload.
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_defaults_to_call() {
        let frame: RequestFrame = serde_json::from_str(
            r#"{"protocol_version": 1, "request_id": "r1", "method": "add", "payload": {"a": 1}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, RequestKind::Call);
        assert_eq!(frame.param("a"), Some(&json!(1)));
        assert!(frame.metadata.is_none());
    }

    #[test]
    fn test_empty_metadata_is_omitted() {
        let frame = RequestFrame::call(1, "r1", "add", json!({})).with_metadata(CallMetadata::default());
        let line = serde_json::to_string(&frame).unwrap();
        assert!(!line.contains("metadata"));

        let frame = frame.with_metadata(CallMetadata {
            authorization: Some("tok".into()),
            traceparent: None,
        });
        let line = serde_json::to_string(&frame).unwrap();
        assert!(line.contains("\"authorization\":\"tok\""));
        assert!(!line.contains("traceparent"));
    }

    #[test]
    fn test_end_frame_has_no_method() {
        let frame = RequestFrame::end(1, "r9");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["kind"], "end");
        assert!(value.get("method").is_none());
    }
}

//! Response frame types.

use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;

/// What a response frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Terminal value of a unary call.
    Result,
    /// Leading header message of a stream or exchange.
    Header,
    /// One item of a stream or exchange.
    Item,
    /// End of a stream or exchange.
    End,
    /// In-band structured log message for the caller.
    Log,
    /// Terminal error.
    Error,
}

impl ResponseKind {
    /// Returns true if no further frames follow for this request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseKind::Result | ResponseKind::End | ResponseKind::Error)
    }
}

/// Log severity of an in-band log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log message emitted by the worker during a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response frame envelope, one JSON object per line on the worker's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Request ID echoed from the request.
    pub request_id: String,
    /// Frame kind.
    pub kind: ResponseKind,
    /// Value for `result`, `header` and `item` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Error details (present when kind is `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Log record (present when kind is `log`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogRecord>,
}

impl ResponseFrame {
    fn bare(request_id: impl Into<String>, kind: ResponseKind) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            payload: None,
            error: None,
            log: None,
        }
    }

    /// Create a result frame. A null value is sent as an absent payload.
    pub fn result(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        let mut frame = Self::bare(request_id, ResponseKind::Result);
        if !payload.is_null() {
            frame.payload = Some(payload);
        }
        frame
    }

    /// Create a header frame.
    pub fn header(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        let mut frame = Self::bare(request_id, ResponseKind::Header);
        frame.payload = Some(payload);
        frame
    }

    /// Create an item frame.
    pub fn item(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        let mut frame = Self::bare(request_id, ResponseKind::Item);
        frame.payload = Some(payload);
        frame
    }

    /// Create an end frame.
    pub fn end(request_id: impl Into<String>) -> Self {
        Self::bare(request_id, ResponseKind::End)
    }

    /// Create an error frame.
    pub fn error(request_id: impl Into<String>, error: ErrorPayload) -> Self {
        let mut frame = Self::bare(request_id, ResponseKind::Error);
        frame.error = Some(error);
        frame
    }

    /// Create a log frame.
    pub fn log(request_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        let mut frame = Self::bare(request_id, ResponseKind::Log);
        frame.log = Some(LogRecord {
            level,
            message: message.into(),
            extra: None,
        });
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_result_has_no_payload() {
        let frame = ResponseFrame::result("r1", serde_json::Value::Null);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["kind"], "result");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ResponseKind::Result.is_terminal());
        assert!(ResponseKind::End.is_terminal());
        assert!(ResponseKind::Error.is_terminal());
        assert!(!ResponseKind::Item.is_terminal());
        assert!(!ResponseKind::Log.is_terminal());
        assert!(!ResponseKind::Header.is_terminal());
    }

    #[test]
    fn test_log_frame_roundtrip_fields() {
        let frame = ResponseFrame::log("r2", LogLevel::Info, "hello");
        let line = serde_json::to_string(&frame).unwrap();
        assert!(line.contains("\"level\":\"info\""));

        let parsed: ResponseFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.log.unwrap().message, "hello");
        assert_eq!(parsed.payload, None);
    }

    #[test]
    fn test_error_frame_parse() {
        let parsed: ResponseFrame = serde_json::from_str(
            r#"{"request_id":"r3","kind":"error","error":{"kind":"RpcError","message":"boom"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, ResponseKind::Error);
        assert_eq!(parsed.error.unwrap().kind, "RpcError");
    }
}

//! Conformance Probe Protocol Types
//!
//! Defines the newline-delimited JSON frames exchanged between the probing
//! client and a worker over the worker's standard input/output.

pub mod error;
pub mod methods;
pub mod request;
pub mod response;

pub use error::{ErrorPayload, FrameError};
pub use request::{CallMetadata, RequestFrame, RequestKind};
pub use response::{LogLevel, LogRecord, ResponseFrame, ResponseKind};

/// Protocol version used for the `hello` handshake (sentinel value).
pub const PROTOCOL_VERSION_HANDSHAKE: i32 = 0;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Name of the service every conformance worker exposes.
pub const CONFORMANCE_SERVICE: &str = "ConformanceService";

/// Key under which a result carries an externalized payload reference.
pub const EXTERNAL_PAYLOAD_KEY: &str = "$external";

/// Key under which a result carries inline base64 bytes.
pub const INLINE_BYTES_KEY: &str = "base64";

/// Byte `i` of a `large_payload` result is `i % LARGE_PAYLOAD_MODULUS`.
pub const LARGE_PAYLOAD_MODULUS: usize = 251;

/// Encode a frame as a single JSON line (without the trailing newline).
pub fn encode_line<T: serde::Serialize>(frame: &T) -> Result<String, FrameError> {
    let line = serde_json::to_string(frame)?;
    Ok(line)
}

/// Decode a frame from a single JSON line.
pub fn decode_line<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    let trimmed = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    if trimmed.trim().is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rejects_blank_line() {
        let result: Result<RequestFrame, _> = decode_line("   \n");
        assert!(matches!(result, Err(FrameError::Empty)));
    }

    #[test]
    fn test_encode_is_single_line() {
        let frame = RequestFrame::call(1, "req-1", methods::ADD, json!({"a": 1.0, "b": 2.0}));
        let line = encode_line(&frame).unwrap();
        assert!(!line.contains('\n'));

        let decoded: RequestFrame = decode_line(&format!("{}\n", line)).unwrap();
        assert_eq!(decoded.method, "add");
        assert_eq!(decoded.kind, RequestKind::Call);
    }
}

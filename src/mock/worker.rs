//! Mock Worker Implementation
//!
//! In-process implementation of the conformance service. Every method the
//! probe battery calls is implemented correctly by default; features can be
//! switched off and failures injected per method.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use probe_protocol::error::{KIND_RPC_ERROR, KIND_UNAUTHENTICATED};
use probe_protocol::methods::{self, kinds};
use probe_protocol::{
    ErrorPayload, LogLevel, RequestFrame, RequestKind, ResponseFrame, ResponseKind,
    CONFORMANCE_SERVICE, EXTERNAL_PAYLOAD_KEY, INLINE_BYTES_KEY, LARGE_PAYLOAD_MODULUS,
    PROTOCOL_MAX, PROTOCOL_MIN, PROTOCOL_VERSION_HANDSHAKE,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::failure::{FailureConfig, FailureInjector};
use super::state::{MockState, OpenExchange};

/// Principal reported after a successful authentication handshake.
pub const MOCK_PRINCIPAL: &str = "conformance-client";

/// Largest payload `large_payload` will produce.
const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// Optional features of the mock worker
#[derive(Debug, Clone, PartialEq)]
pub struct MockFeatures {
    /// `__describe__` is answered
    pub introspection: bool,
    /// Describe output carries parameter and return types
    pub annotations: bool,
    /// `emit_log` sends an in-band log record
    pub client_logging: bool,
    /// Header variants of streams and exchanges are served
    pub headers: bool,
    /// Exchange methods are served
    pub exchange: bool,
    /// `echo_record` is served
    pub records: bool,
    /// Authentication handshake and `whoami` are served
    pub authentication: bool,
    /// `large_payload` is externalized instead of inline
    pub external_storage: bool,
    /// `echo_trace_context` echoes the propagated traceparent
    pub tracing: bool,
    /// Error kind reported by `raise_error`
    pub error_kind: String,
}

impl Default for MockFeatures {
    fn default() -> Self {
        Self {
            introspection: true,
            annotations: true,
            client_logging: true,
            headers: true,
            exchange: true,
            records: true,
            authentication: true,
            external_storage: true,
            tracing: true,
            error_kind: KIND_RPC_ERROR.to_string(),
        }
    }
}

impl MockFeatures {
    /// Only the base call shapes and echo methods
    pub fn minimal() -> Self {
        Self {
            introspection: false,
            annotations: false,
            client_logging: false,
            headers: false,
            exchange: false,
            records: false,
            authentication: false,
            external_storage: false,
            tracing: false,
            error_kind: KIND_RPC_ERROR.to_string(),
        }
    }

    /// Names accepted by [`MockFeatures::disable`].
    pub const NAMES: &'static [&'static str] = &[
        "introspection",
        "annotated_types",
        "client_logging",
        "headers",
        "exchange",
        "dataclass_types",
        "authentication",
        "external_storage",
        "opentelemetry",
    ];

    /// Switch a feature off by name. Returns false for unknown names.
    pub fn disable(&mut self, name: &str) -> bool {
        let flag = match name {
            "introspection" => &mut self.introspection,
            "annotated_types" => &mut self.annotations,
            "client_logging" => &mut self.client_logging,
            "headers" => &mut self.headers,
            "exchange" => &mut self.exchange,
            "dataclass_types" => &mut self.records,
            "authentication" => &mut self.authentication,
            "external_storage" => &mut self.external_storage,
            "opentelemetry" => &mut self.tracing,
            _ => return false,
        };
        *flag = false;
        true
    }
}

/// When the frames of a reply become readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDelay {
    Immediate,
    After(Duration),
    Never,
}

/// Line a garbled reply is written as.
pub const GARBLED_LINE: &str = "<<not a frame>>";

/// Frames produced for one request frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReply {
    pub frames: Vec<ResponseFrame>,
    pub delay: ReplyDelay,
    /// Write [`GARBLED_LINE`] instead of the frames
    pub garbled: bool,
}

impl WorkerReply {
    fn now(frames: Vec<ResponseFrame>) -> Self {
        Self {
            frames,
            delay: ReplyDelay::Immediate,
            garbled: false,
        }
    }
}

/// Configurable mock worker for testing
#[derive(Debug, Clone)]
pub struct MockWorker {
    service: String,
    protocol_range: (i32, i32),
    external_dir: PathBuf,
    features: Arc<Mutex<MockFeatures>>,
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockWorker {
    /// Create a mock worker with every feature enabled
    pub fn new() -> Self {
        Self::with_features(MockFeatures::default())
    }

    /// Create a mock worker with the given feature set
    pub fn with_features(features: MockFeatures) -> Self {
        Self {
            service: CONFORMANCE_SERVICE.to_string(),
            protocol_range: (PROTOCOL_MIN, PROTOCOL_MAX),
            external_dir: std::env::temp_dir(),
            features: Arc::new(Mutex::new(features)),
            state: Arc::new(Mutex::new(MockState::new())),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
        }
    }

    /// Report a different service name in the handshake
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Report a different supported protocol range in the handshake
    pub fn with_protocol_range(mut self, min: i32, max: i32) -> Self {
        self.protocol_range = (min, max);
        self
    }

    /// Directory for externalized payload files
    pub fn with_external_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.external_dir = dir.into();
        self
    }

    // === Public API for test configuration ===

    /// Replace the feature set
    pub fn set_features(&self, features: MockFeatures) {
        *lock(&self.features) = features;
    }

    /// Current feature set
    pub fn features(&self) -> MockFeatures {
        lock(&self.features).clone()
    }

    /// Inject a failure for a method
    pub fn inject_failure(&self, method: &str, config: FailureConfig) {
        lock(&self.failures).inject(method, config);
    }

    /// Inject an error for a method
    pub fn inject_error(&self, method: &str, kind: &str, message: &str) {
        lock(&self.failures).inject_error(method, kind, message);
    }

    /// Number of calls handled for a method
    pub fn call_count(&self, method: &str) -> u32 {
        lock(&self.state).call_count(method)
    }

    // === Request handling ===

    /// Handle one line of input, as the stdio worker loop does.
    pub fn handle_line(&self, line: &str) -> WorkerReply {
        match probe_protocol::decode_line::<RequestFrame>(line) {
            Ok(frame) => self.handle_frame(&frame),
            Err(e) => WorkerReply::now(vec![ResponseFrame::error(
                "",
                ErrorPayload::invalid_request(e.to_string()),
            )]),
        }
    }

    /// Handle one request frame and return the frames it produces.
    pub fn handle_frame(&self, frame: &RequestFrame) -> WorkerReply {
        let id = frame.request_id.as_str();

        if let Err(error) = self.validate_protocol_version(frame) {
            return WorkerReply::now(vec![ResponseFrame::error(id, error)]);
        }

        let failure = match frame.kind {
            RequestKind::Call => {
                lock(&self.state).record_call(&frame.method);
                lock(&self.failures).check(&frame.method)
            }
            RequestKind::Item | RequestKind::End => {
                let exchange_method = lock(&self.state)
                    .exchanges
                    .get(id)
                    .map(|open| open.method.clone());
                exchange_method.and_then(|method| self.exchange_failure(&method))
            }
        };

        let frames = match frame.kind {
            RequestKind::Call => self.dispatch(frame),
            RequestKind::Item => self.handle_exchange_item(frame),
            RequestKind::End => self.handle_exchange_end(frame),
        };

        match failure {
            Some(failure) => apply_failure(id, frames, failure),
            None => WorkerReply::now(frames),
        }
    }

    // === Internal helpers ===

    /// Failures stay in effect for the items of an exchange opened while
    /// injected, without consuming the fail count again.
    fn exchange_failure(&self, method: &str) -> Option<FailureConfig> {
        lock(&self.failures).peek(method)
    }

    fn validate_protocol_version(&self, frame: &RequestFrame) -> Result<(), ErrorPayload> {
        if frame.kind == RequestKind::Call && frame.method == methods::HELLO {
            if frame.protocol_version != PROTOCOL_VERSION_HANDSHAKE {
                return Err(ErrorPayload::unsupported_protocol(
                    frame.protocol_version,
                    PROTOCOL_VERSION_HANDSHAKE,
                    PROTOCOL_VERSION_HANDSHAKE,
                ));
            }
            return Ok(());
        }

        let (min, max) = self.protocol_range;
        if frame.protocol_version < min || frame.protocol_version > max {
            return Err(ErrorPayload::unsupported_protocol(frame.protocol_version, min, max));
        }
        Ok(())
    }

    fn dispatch(&self, frame: &RequestFrame) -> Vec<ResponseFrame> {
        let id = frame.request_id.as_str();
        let features = self.features();
        let unknown = || vec![ResponseFrame::error(id, ErrorPayload::unknown_method(&frame.method))];

        let reply = |result: Result<Value, ErrorPayload>| match result {
            Ok(value) => vec![ResponseFrame::result(id, value)],
            Err(error) => vec![ResponseFrame::error(id, error)],
        };

        match frame.method.as_str() {
            methods::HELLO => reply(Ok(json!({
                "service": self.service,
                "protocol_min": self.protocol_range.0,
                "protocol_max": self.protocol_range.1,
            }))),
            methods::GOODBYE => reply(Ok(Value::Null)),
            methods::DESCRIBE if features.introspection => reply(Ok(self.describe(&features))),
            methods::AUTHENTICATE if features.authentication => reply(self.authenticate(frame)),
            methods::WHOAMI if features.authentication => reply(self.whoami(frame)),
            methods::ADD => reply(add(frame)),
            methods::VOID_METHOD => reply(Ok(Value::Null)),
            methods::COUNT_STREAM => count_stream(frame, false),
            methods::COUNT_STREAM_WITH_HEADER if features.headers => count_stream(frame, true),
            methods::SCALE_EXCHANGE if features.exchange => self.open_exchange(frame, false),
            methods::SCALE_EXCHANGE_WITH_HEADER if features.exchange && features.headers => {
                self.open_exchange(frame, true)
            }
            methods::RAISE_ERROR => reply(Err(ErrorPayload::new(
                features.error_kind.clone(),
                "raise_error always fails",
            ))),
            methods::ECHO_LIST => reply(required(frame, "values").cloned()),
            methods::ECHO_OPTIONAL => reply(Ok(frame.param("value").cloned().unwrap_or(Value::Null))),
            methods::ECHO_RECORD if features.records => reply(required(frame, "record").cloned()),
            methods::EMIT_LOG => emit_log(frame, features.client_logging),
            methods::LARGE_PAYLOAD => reply(self.large_payload(frame, features.external_storage)),
            methods::ECHO_TRACE_CONTEXT => {
                let traceparent = if features.tracing {
                    frame.metadata.as_ref().and_then(|m| m.traceparent.clone())
                } else {
                    None
                };
                reply(Ok(json!({ "traceparent": traceparent })))
            }
            _ => unknown(),
        }
    }

    fn describe(&self, features: &MockFeatures) -> Value {
        let typed = |name: &str, ty: &str| {
            if features.annotations {
                json!({ "name": name, "type": ty })
            } else {
                json!({ "name": name })
            }
        };
        let returns = |ty: &str| {
            if features.annotations {
                Value::String(ty.to_string())
            } else {
                Value::Null
            }
        };

        let mut table = vec![
            json!({
                "name": methods::ADD, "kind": kinds::UNARY,
                "params": [typed("a", "float64"), typed("b", "float64")],
                "returns": returns("float64"), "doc": "Add two numbers.",
            }),
            json!({ "name": methods::VOID_METHOD, "kind": kinds::UNARY, "params": [], "returns": Value::Null }),
            json!({
                "name": methods::COUNT_STREAM, "kind": kinds::STREAM,
                "params": [typed("n", "int64")], "returns": returns("int64"),
            }),
            json!({ "name": methods::RAISE_ERROR, "kind": kinds::UNARY, "params": [], "returns": Value::Null }),
            json!({
                "name": methods::ECHO_LIST, "kind": kinds::UNARY,
                "params": [typed("values", "list<int64>")], "returns": returns("list<int64>"),
            }),
            json!({
                "name": methods::ECHO_OPTIONAL, "kind": kinds::UNARY,
                "params": [typed("value", "optional<string>")], "returns": returns("optional<string>"),
            }),
        ];
        if features.headers {
            table.push(json!({
                "name": methods::COUNT_STREAM_WITH_HEADER, "kind": kinds::STREAM,
                "params": [typed("n", "int64")], "returns": returns("int64"),
            }));
        }
        if features.exchange {
            table.push(json!({
                "name": methods::SCALE_EXCHANGE, "kind": kinds::EXCHANGE,
                "params": [typed("factor", "float64")], "returns": returns("float64"),
            }));
        }
        if features.records {
            table.push(json!({
                "name": methods::ECHO_RECORD, "kind": kinds::UNARY,
                "params": [typed("record", "Point")], "returns": returns("Point"),
            }));
        }
        if features.authentication {
            table.push(json!({ "name": methods::WHOAMI, "kind": kinds::UNARY, "params": [], "returns": returns("string") }));
        }

        json!({
            "service": self.service,
            "protocol_version": self.protocol_range.1,
            "methods": table,
        })
    }

    fn authenticate(&self, frame: &RequestFrame) -> Result<Value, ErrorPayload> {
        let scheme = frame.param("scheme").and_then(Value::as_str).unwrap_or_default();
        let credentials = frame.param("credentials").and_then(Value::as_str).unwrap_or_default();
        if scheme != methods::BEARER_SCHEME || credentials != methods::CONFORMANCE_CREDENTIAL {
            return Err(ErrorPayload::new(KIND_UNAUTHENTICATED, "credentials rejected"));
        }

        let token = format!("tok-{}", uuid::Uuid::new_v4().simple());
        lock(&self.state).tokens.insert(token.clone());
        Ok(json!({ "principal": MOCK_PRINCIPAL, "token": token }))
    }

    fn whoami(&self, frame: &RequestFrame) -> Result<Value, ErrorPayload> {
        let token = frame
            .metadata
            .as_ref()
            .and_then(|m| m.authorization.as_deref())
            .ok_or_else(|| ErrorPayload::new(KIND_UNAUTHENTICATED, "no bearer token"))?;
        if !lock(&self.state).tokens.contains(token) {
            return Err(ErrorPayload::new(KIND_UNAUTHENTICATED, "unknown bearer token"));
        }
        Ok(json!({ "principal": MOCK_PRINCIPAL }))
    }

    fn open_exchange(&self, frame: &RequestFrame, with_header: bool) -> Vec<ResponseFrame> {
        let id = frame.request_id.as_str();
        let factor = match frame.param("factor").and_then(Value::as_f64) {
            Some(factor) => factor,
            None => {
                return vec![ResponseFrame::error(
                    id,
                    ErrorPayload::invalid_request("factor must be a number"),
                )]
            }
        };

        lock(&self.state).exchanges.insert(
            id.to_string(),
            OpenExchange {
                method: frame.method.clone(),
                factor,
            },
        );

        if with_header {
            vec![ResponseFrame::header(id, json!({ "factor": factor }))]
        } else {
            Vec::new()
        }
    }

    fn handle_exchange_item(&self, frame: &RequestFrame) -> Vec<ResponseFrame> {
        let id = frame.request_id.as_str();
        let factor = match lock(&self.state).exchanges.get(id) {
            Some(open) => open.factor,
            None => {
                return vec![ResponseFrame::error(
                    id,
                    ErrorPayload::invalid_request("no open exchange for request"),
                )]
            }
        };
        match frame.payload.as_f64() {
            Some(value) => vec![ResponseFrame::item(id, json!(value * factor))],
            None => vec![ResponseFrame::error(
                id,
                ErrorPayload::invalid_request("exchange items must be numbers"),
            )],
        }
    }

    fn handle_exchange_end(&self, frame: &RequestFrame) -> Vec<ResponseFrame> {
        let id = frame.request_id.as_str();
        match lock(&self.state).exchanges.remove(id) {
            Some(_) => vec![ResponseFrame::end(id)],
            None => vec![ResponseFrame::error(
                id,
                ErrorPayload::invalid_request("no open exchange for request"),
            )],
        }
    }

    fn large_payload(&self, frame: &RequestFrame, externalize: bool) -> Result<Value, ErrorPayload> {
        let size = frame
            .param("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| ErrorPayload::invalid_request("size must be a non-negative integer"))?;
        if size > MAX_PAYLOAD_BYTES {
            return Err(ErrorPayload::invalid_request(format!(
                "size {} exceeds limit {}",
                size, MAX_PAYLOAD_BYTES
            )));
        }

        let bytes: Vec<u8> = (0..size as usize)
            .map(|i| (i % LARGE_PAYLOAD_MODULUS) as u8)
            .collect();

        if !externalize {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            return Ok(json!({ INLINE_BYTES_KEY: encoded }));
        }

        let path = self
            .external_dir
            .join(format!("mock-payload-{}.bin", uuid::Uuid::new_v4().simple()));
        std::fs::write(&path, &bytes)
            .map_err(|e| ErrorPayload::new("StorageError", format!("{}: {}", path.display(), e)))?;
        lock(&self.state).external_files.push(path.clone());

        let sha256 = hex::encode(Sha256::digest(&bytes));
        Ok(json!({
            EXTERNAL_PAYLOAD_KEY: {
                "path": path.to_string_lossy(),
                "size": size,
                "sha256": sha256,
            }
        }))
    }
}

fn required<'a>(frame: &'a RequestFrame, name: &str) -> Result<&'a Value, ErrorPayload> {
    frame
        .param(name)
        .ok_or_else(|| ErrorPayload::invalid_request(format!("missing parameter '{}'", name)))
}

fn add(frame: &RequestFrame) -> Result<Value, ErrorPayload> {
    let operand = |name: &str| {
        required(frame, name)?
            .as_f64()
            .ok_or_else(|| ErrorPayload::invalid_request(format!("'{}' must be a number", name)))
    };
    Ok(json!(operand("a")? + operand("b")?))
}

fn count_stream(frame: &RequestFrame, with_header: bool) -> Vec<ResponseFrame> {
    let id = frame.request_id.as_str();
    let n = match frame.param("n").and_then(Value::as_u64) {
        Some(n) => n,
        None => {
            return vec![ResponseFrame::error(
                id,
                ErrorPayload::invalid_request("n must be a non-negative integer"),
            )]
        }
    };

    let mut frames = Vec::with_capacity(n as usize + 2);
    if with_header {
        frames.push(ResponseFrame::header(id, json!({ "total": n })));
    }
    frames.extend((0..n).map(|i| ResponseFrame::item(id, json!({ "index": i }))));
    frames.push(ResponseFrame::end(id));
    frames
}

fn emit_log(frame: &RequestFrame, logging: bool) -> Vec<ResponseFrame> {
    let id = frame.request_id.as_str();
    let message = frame
        .param("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let level = frame
        .param("level")
        .and_then(|v| serde_json::from_value::<LogLevel>(v.clone()).ok())
        .unwrap_or(LogLevel::Info);

    let mut frames = Vec::with_capacity(2);
    if logging {
        frames.push(ResponseFrame::log(id, level, message));
    }
    frames.push(ResponseFrame::result(id, Value::Null));
    frames
}

/// Rewrite the normal reply according to an injected failure.
fn apply_failure(id: &str, frames: Vec<ResponseFrame>, failure: FailureConfig) -> WorkerReply {
    if failure.hang {
        return WorkerReply {
            frames: Vec::new(),
            delay: ReplyDelay::Never,
            garbled: false,
        };
    }
    if failure.garble {
        return WorkerReply {
            frames: Vec::new(),
            delay: ReplyDelay::Immediate,
            garbled: true,
        };
    }

    let mut frames = match failure.error {
        Some(error) => vec![ResponseFrame::error(id, error)],
        None => frames,
    };

    if let Some(value) = failure.result {
        let mut replaced = false;
        for frame in frames.iter_mut() {
            if matches!(frame.kind, ResponseKind::Result | ResponseKind::Item) {
                frame.payload = Some(value.clone());
                replaced = true;
            }
        }
        if !replaced {
            frames.retain(|f| f.kind != ResponseKind::Error);
            frames.push(ResponseFrame {
                request_id: id.to_string(),
                kind: ResponseKind::Result,
                payload: Some(value),
                error: None,
                log: None,
            });
        }
    }

    if let Some(limit) = failure.truncate {
        let mut seen = 0;
        frames.retain(|f| {
            if f.kind != ResponseKind::Item {
                return true;
            }
            seen += 1;
            seen <= limit
        });
    }

    WorkerReply {
        frames,
        delay: failure
            .delay
            .map(ReplyDelay::After)
            .unwrap_or(ReplyDelay::Immediate),
        garbled: false,
    }
}

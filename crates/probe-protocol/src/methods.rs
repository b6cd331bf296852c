//! Method names of the conformance service.

/// Session handshake.
pub const HELLO: &str = "hello";
/// Introspection: returns the declared method list.
pub const DESCRIBE: &str = "__describe__";
/// Authentication handshake.
pub const AUTHENTICATE: &str = "__authenticate__";
/// Orderly session shutdown.
pub const GOODBYE: &str = "goodbye";

pub const ADD: &str = "add";
pub const VOID_METHOD: &str = "void_method";
pub const COUNT_STREAM: &str = "count_stream";
pub const COUNT_STREAM_WITH_HEADER: &str = "count_stream_with_header";
pub const SCALE_EXCHANGE: &str = "scale_exchange";
pub const SCALE_EXCHANGE_WITH_HEADER: &str = "scale_exchange_with_header";
pub const RAISE_ERROR: &str = "raise_error";
pub const ECHO_LIST: &str = "echo_list";
pub const ECHO_OPTIONAL: &str = "echo_optional";
pub const ECHO_RECORD: &str = "echo_record";
pub const EMIT_LOG: &str = "emit_log";
pub const WHOAMI: &str = "whoami";
pub const LARGE_PAYLOAD: &str = "large_payload";
pub const ECHO_TRACE_CONTEXT: &str = "echo_trace_context";

/// Shape of a declared method, as reported by introspection.
pub mod kinds {
    pub const UNARY: &str = "unary";
    pub const STREAM: &str = "stream";
    pub const EXCHANGE: &str = "exchange";
}

/// Authentication scheme used by the conformance handshake.
pub const BEARER_SCHEME: &str = "bearer";

/// Fixed credential every conformance worker accepts for [`BEARER_SCHEME`].
pub const CONFORMANCE_CREDENTIAL: &str = "conformance-credential";

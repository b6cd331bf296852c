//! Feature probes: optional capabilities layered on the base protocol.

use probe_protocol::error::KIND_RPC_ERROR;
use probe_protocol::methods;
use probe_protocol::{LogLevel, LARGE_PAYLOAD_MODULUS};
use serde_json::{json, Value};

use super::{same_value, ProbeCategory, ProbeDefinition, ProbeFn, ProbeOutcome};
use crate::session::{CallError, Session};

/// Message `emit_log` is asked to log
pub const LOG_MESSAGE: &str = "conformance";

/// Size requested from `large_payload` (1 MiB)
pub const LARGE_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Trace context propagated to `echo_trace_context`
pub const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

/// Type annotation expected on `add`'s parameters and return
pub const FLOAT_ANNOTATION: &str = "float64";

fn feature(id: &'static str, description: &'static str, run: ProbeFn) -> ProbeDefinition {
    ProbeDefinition {
        id,
        category: ProbeCategory::Feature,
        description,
        run,
    }
}

pub(super) fn definitions() -> Vec<ProbeDefinition> {
    vec![
        feature("introspection", "describe returns a non-empty method list", introspection),
        feature("client_logging", "emit_log delivers an info record in-band", client_logging),
        feature("error_propagation", "raise_error fails with an RpcError kind", error_propagation),
        feature("complex_types", "echo_list([1,2,3]) round-trips", complex_types),
        feature("optional_types", "echo_optional(null) returns null", optional_types),
        feature("dataclass_types", "echo_record(point) round-trips", dataclass_types),
        feature("annotated_types", "add declares float64 params and return", annotated_types),
        feature("authentication", "bearer handshake then whoami", authentication),
        feature("external_storage", "large_payload arrives externalized and intact", external_storage),
        feature("opentelemetry", "traceparent is propagated", opentelemetry),
    ]
}

fn sample_record() -> Value {
    json!({ "name": "point", "x": 1.5, "y": -2.0, "tags": ["a", "b"] })
}

pub fn introspection(session: &mut Session) -> ProbeOutcome {
    let description = session.describe()?;
    Ok(!description.methods.is_empty())
}

pub fn client_logging(session: &mut Session) -> ProbeOutcome {
    session.take_logs();
    session.unary(methods::EMIT_LOG, json!({ "message": LOG_MESSAGE }))?;
    let logs = session.take_logs();
    Ok(logs
        .iter()
        .any(|record| record.level == LogLevel::Info && record.message == LOG_MESSAGE))
}

pub fn error_propagation(session: &mut Session) -> ProbeOutcome {
    match session.unary(methods::RAISE_ERROR, json!({})) {
        Ok(_) => Ok(false),
        Err(CallError::Remote(error)) => Ok(error.kind.contains(KIND_RPC_ERROR)),
        Err(e) => Err(e.into()),
    }
}

pub fn complex_types(session: &mut Session) -> ProbeOutcome {
    let values = json!([1, 2, 3]);
    let echoed = session.unary(methods::ECHO_LIST, json!({ "values": values }))?;
    Ok(same_value(&echoed, &values))
}

pub fn optional_types(session: &mut Session) -> ProbeOutcome {
    let echoed = session.unary(methods::ECHO_OPTIONAL, json!({ "value": null }))?;
    Ok(echoed.is_null())
}

pub fn dataclass_types(session: &mut Session) -> ProbeOutcome {
    let record = sample_record();
    let echoed = session.unary(methods::ECHO_RECORD, json!({ "record": record }))?;
    Ok(same_value(&echoed, &record))
}

pub fn annotated_types(session: &mut Session) -> ProbeOutcome {
    let description = session.describe()?;
    let Some(add) = description.method(methods::ADD) else {
        return Ok(false);
    };
    Ok(add.param_type("a") == Some(FLOAT_ANNOTATION)
        && add.param_type("b") == Some(FLOAT_ANNOTATION)
        && add.returns.as_deref() == Some(FLOAT_ANNOTATION))
}

pub fn authentication(session: &mut Session) -> ProbeOutcome {
    let outcome = authenticated_whoami(session);
    session.clear_authorization();
    outcome
}

fn authenticated_whoami(session: &mut Session) -> ProbeOutcome {
    let grant = session.authenticate(methods::BEARER_SCHEME, methods::CONFORMANCE_CREDENTIAL)?;
    let whoami = session.unary(methods::WHOAMI, json!({}))?;
    Ok(!grant.principal.is_empty()
        && whoami.get("principal").and_then(Value::as_str) == Some(grant.principal.as_str()))
}

pub fn external_storage(session: &mut Session) -> ProbeOutcome {
    let payload = session.fetch_payload(methods::LARGE_PAYLOAD, json!({ "size": LARGE_PAYLOAD_SIZE }))?;
    Ok(payload.externalized
        && payload.bytes.len() == LARGE_PAYLOAD_SIZE
        && payload
            .bytes
            .iter()
            .enumerate()
            .all(|(i, byte)| usize::from(*byte) == i % LARGE_PAYLOAD_MODULUS))
}

pub fn opentelemetry(session: &mut Session) -> ProbeOutcome {
    session.set_traceparent(Some(TRACEPARENT.to_string()));
    let echoed = session.unary(methods::ECHO_TRACE_CONTEXT, json!({}));
    session.set_traceparent(None);
    Ok(echoed?.get("traceparent").and_then(Value::as_str) == Some(TRACEPARENT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, MockFeatures, MockWorker};
    use crate::session::{MockTransport, ServiceDescriptor, SessionConfig};
    use std::time::Duration;

    fn session(worker: MockWorker) -> Session {
        Session::open(
            Box::new(MockTransport::with_worker(worker)),
            &ServiceDescriptor::conformance(),
            SessionConfig {
                call_timeout: Duration::from_millis(200),
            },
        )
        .unwrap()
    }

    fn without(feature: &str) -> MockWorker {
        let mut features = MockFeatures::default();
        assert!(features.disable(feature));
        MockWorker::with_features(features)
    }

    #[test]
    fn test_all_features_pass_against_mock() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(MockWorker::new().with_external_dir(dir.path()));
        for probe in definitions() {
            assert!(matches!((probe.run)(&mut s), Ok(true)), "probe {} failed", probe.id);
        }
    }

    #[test]
    fn test_error_propagation_requires_failure() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::RAISE_ERROR, FailureConfig::wrong_result(json!(null)));
        assert!(matches!(error_propagation(&mut session(worker)), Ok(false)));
    }

    #[test]
    fn test_error_propagation_wrong_kind() {
        let mut features = MockFeatures::default();
        features.error_kind = "ValueError".to_string();
        let worker = MockWorker::with_features(features);
        assert!(matches!(error_propagation(&mut session(worker)), Ok(false)));
    }

    #[test]
    fn test_optional_non_null_is_false() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::ECHO_OPTIONAL, FailureConfig::wrong_result(json!("x")));
        assert!(matches!(optional_types(&mut session(worker)), Ok(false)));
    }

    #[test]
    fn test_logging_disabled_is_false() {
        assert!(matches!(client_logging(&mut session(without("client_logging"))), Ok(false)));
    }

    #[test]
    fn test_annotations_missing_is_false() {
        assert!(matches!(annotated_types(&mut session(without("annotated_types"))), Ok(false)));
    }

    #[test]
    fn test_inline_payload_is_not_external_storage() {
        assert!(matches!(external_storage(&mut session(without("external_storage"))), Ok(false)));
    }

    #[test]
    fn test_tracing_disabled_is_false() {
        assert!(matches!(opentelemetry(&mut session(without("opentelemetry"))), Ok(false)));
    }

    #[test]
    fn test_authentication_leaves_no_token_behind() {
        let mut s = session(MockWorker::new());
        assert!(matches!(authentication(&mut s), Ok(true)));
        assert!(s.unary(methods::WHOAMI, json!({})).is_err());
    }

    #[test]
    fn test_authentication_unsupported_is_fault() {
        assert!(authentication(&mut session(without("authentication"))).is_err());
    }

    /// Transport that keeps a copy of every request it sends.
    struct Recording {
        inner: MockTransport,
        sent: std::sync::Arc<std::sync::Mutex<Vec<probe_protocol::RequestFrame>>>,
    }

    impl crate::session::Transport for Recording {
        fn send(&mut self, frame: &probe_protocol::RequestFrame) -> Result<(), crate::session::TransportError> {
            self.sent.lock().unwrap().push(frame.clone());
            self.inner.send(frame)
        }

        fn recv(&mut self, timeout: Duration) -> Result<probe_protocol::ResponseFrame, crate::session::TransportError> {
            self.inner.recv(timeout)
        }
    }

    #[test]
    fn test_client_logging_sends_only_the_message() {
        let sent = std::sync::Arc::default();
        let transport = Recording {
            inner: MockTransport::new(),
            sent: std::sync::Arc::clone(&sent),
        };
        let mut s = Session::open(
            Box::new(transport),
            &ServiceDescriptor::conformance(),
            SessionConfig {
                call_timeout: Duration::from_millis(200),
            },
        )
        .unwrap();

        assert!(matches!(client_logging(&mut s), Ok(true)));
        let sent = sent.lock().unwrap();
        let call = sent.iter().find(|f| f.method == methods::EMIT_LOG).unwrap();
        assert_eq!(call.payload, json!({ "message": LOG_MESSAGE }));
    }
}

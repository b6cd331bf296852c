//! Call-pattern probes: the structural call shapes end to end.

use probe_protocol::methods;
use serde_json::{json, Value};

use super::{ProbeCategory, ProbeDefinition, ProbeFn, ProbeOutcome, FLOAT_TOLERANCE};
use crate::session::{CallError, Exchange, Session};

/// Items requested from the counted stream
pub const STREAM_COUNT: u64 = 3;

/// Multiplier sent when opening an exchange
pub const EXCHANGE_FACTOR: f64 = 2.0;

/// Client items fed into an exchange
pub const EXCHANGE_INPUTS: [f64; 3] = [1.0, 2.0, 3.0];

fn pattern(id: &'static str, description: &'static str, run: ProbeFn) -> ProbeDefinition {
    ProbeDefinition {
        id,
        category: ProbeCategory::CallPattern,
        description,
        run,
    }
}

pub(super) fn definitions() -> Vec<ProbeDefinition> {
    vec![
        pattern("unary", "add(1.0, 2.0) returns 3.0", unary),
        pattern("unary_void", "void_method() returns no value", unary_void),
        pattern("producer", "count_stream(n=3) yields 3 items", producer),
        pattern(
            "producer_with_header",
            "count_stream_with_header(n=3) sends {total: 3} then 3 items",
            producer_with_header,
        ),
        pattern("exchange", "scale_exchange(factor=2.0) maps 1,2,3 to 2,4,6", exchange),
        pattern(
            "exchange_with_header",
            "scale_exchange_with_header(factor=2.0) sends {factor: 2.0} then maps 1,2,3",
            exchange_with_header,
        ),
    ]
}

fn close_to(value: &Value, expected: f64) -> bool {
    value
        .as_f64()
        .map_or(false, |actual| (actual - expected).abs() < FLOAT_TOLERANCE)
}

pub fn unary(session: &mut Session) -> ProbeOutcome {
    let sum = session.unary(methods::ADD, json!({ "a": 1.0, "b": 2.0 }))?;
    Ok(close_to(&sum, 3.0))
}

pub fn unary_void(session: &mut Session) -> ProbeOutcome {
    match session.void_call(methods::VOID_METHOD, json!({})) {
        Ok(()) => Ok(true),
        Err(CallError::Malformed { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn producer(session: &mut Session) -> ProbeOutcome {
    let items = session
        .server_stream(methods::COUNT_STREAM, json!({ "n": STREAM_COUNT }))?
        .collect_items()?;
    Ok(items.len() as u64 == STREAM_COUNT)
}

pub fn producer_with_header(session: &mut Session) -> ProbeOutcome {
    let stream = session.server_stream(methods::COUNT_STREAM_WITH_HEADER, json!({ "n": STREAM_COUNT }))?;
    let header_ok = stream
        .header()
        .and_then(|header| header.get("total"))
        .and_then(Value::as_u64)
        == Some(STREAM_COUNT);
    let items = stream.collect_items()?;
    Ok(header_ok && items.len() as u64 == STREAM_COUNT)
}

/// Feed every input and check each answer; all inputs are sent even after a mismatch.
fn scale_inputs(exchange: &mut Exchange<'_>) -> Result<bool, CallError> {
    let mut all_match = true;
    for input in EXCHANGE_INPUTS {
        let output = exchange.exchange(json!(input))?;
        all_match &= close_to(&output, input * EXCHANGE_FACTOR);
    }
    Ok(all_match)
}

pub fn exchange(session: &mut Session) -> ProbeOutcome {
    let mut exchange = session.exchange(methods::SCALE_EXCHANGE, json!({ "factor": EXCHANGE_FACTOR }))?;
    let scaled = scale_inputs(&mut exchange)?;
    exchange.finish()?;
    Ok(scaled)
}

pub fn exchange_with_header(session: &mut Session) -> ProbeOutcome {
    let mut exchange = session.exchange(
        methods::SCALE_EXCHANGE_WITH_HEADER,
        json!({ "factor": EXCHANGE_FACTOR }),
    )?;
    let header = exchange.read_header()?;
    let header_ok = header
        .get("factor")
        .map_or(false, |factor| close_to(factor, EXCHANGE_FACTOR));
    let scaled = scale_inputs(&mut exchange)?;
    exchange.finish()?;
    Ok(header_ok && scaled)
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
                call_timeout: Duration::from_millis(100),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_all_patterns_pass_against_mock() {
        let mut s = session(MockWorker::new());
        for probe in definitions() {
            assert!(matches!((probe.run)(&mut s), Ok(true)), "probe {} failed", probe.id);
        }
    }

    #[test]
    fn test_unary_wrong_sum_is_false() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::ADD, FailureConfig::wrong_result(json!(4.0)));
        assert!(matches!(unary(&mut session(worker)), Ok(false)));
    }

    #[test]
    fn test_producer_short_stream_is_false() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::COUNT_STREAM, FailureConfig::truncate(2));
        assert!(matches!(producer(&mut session(worker)), Ok(false)));
    }

    #[test]
    fn test_producer_timeout_is_fault() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::COUNT_STREAM, FailureConfig::hang());
        let outcome = producer(&mut session(worker));
        assert!(outcome.unwrap_err().is_timeout());
    }

    #[test]
    fn test_exchange_unsupported_is_fault() {
        let worker = MockWorker::with_features(MockFeatures::minimal());
        assert!(exchange(&mut session(worker)).is_err());
    }

    #[test]
    fn test_unary_void_returning_value_is_false() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::VOID_METHOD, FailureConfig::wrong_result(json!(1)));
        assert!(matches!(unary_void(&mut session(worker)), Ok(false)));
    }
}

//! Streaming call handles borrowed from a [`Session`].

use probe_protocol::{ResponseFrame, ResponseKind};
use serde_json::Value;

use super::client::{remote_error, Session};
use super::error::CallError;

/// Lazy, finite, non-restartable sequence of server-streamed items.
pub struct ServerStream<'s> {
    session: &'s mut Session,
    method: String,
    request_id: String,
    header: Option<Value>,
    pending: Option<ResponseFrame>,
    finished: bool,
}

impl<'s> ServerStream<'s> {
    pub(super) fn open(
        session: &'s mut Session,
        method: &str,
        request_id: String,
    ) -> Result<Self, CallError> {
        let first = session.next_frame(method, &request_id)?;
        let mut stream = Self {
            session,
            method: method.to_string(),
            request_id,
            header: None,
            pending: None,
            finished: false,
        };
        match first.kind {
            ResponseKind::Header => stream.header = Some(first.payload.unwrap_or(Value::Null)),
            ResponseKind::Error => return Err(remote_error(first)),
            _ => stream.pending = Some(first),
        }
        Ok(stream)
    }

    /// Leading header message, if the worker sent one.
    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    /// Drain the remaining items.
    pub fn collect_items(self) -> Result<Vec<Value>, CallError> {
        self.collect()
    }

    fn read_item(&mut self) -> Result<Option<Value>, CallError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => self.session.next_frame(&self.method, &self.request_id)?,
        };
        match frame.kind {
            ResponseKind::Item => Ok(Some(frame.payload.unwrap_or(Value::Null))),
            ResponseKind::End => {
                self.finished = true;
                Ok(None)
            }
            ResponseKind::Error => Err(remote_error(frame)),
            kind => Err(CallError::UnexpectedFrame {
                method: self.method.clone(),
                kind,
            }),
        }
    }
}

impl Iterator for ServerStream<'_> {
    type Item = Result<Value, CallError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.read_item();
        if item.is_err() {
            self.finished = true;
        }
        item.transpose()
    }
}

/// Open bidirectional exchange: one worker item per client item.
pub struct Exchange<'s> {
    session: &'s mut Session,
    method: String,
    request_id: String,
    header: Option<Value>,
}

impl<'s> Exchange<'s> {
    pub(super) fn new(session: &'s mut Session, method: &str, request_id: String) -> Self {
        Self {
            session,
            method: method.to_string(),
            request_id,
            header: None,
        }
    }

    /// Header received so far, if any.
    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    /// Wait for the leading header message.
    pub fn read_header(&mut self) -> Result<Value, CallError> {
        if let Some(header) = &self.header {
            return Ok(header.clone());
        }
        let frame = self.session.next_frame(&self.method, &self.request_id)?;
        match frame.kind {
            ResponseKind::Header => {
                let header = frame.payload.unwrap_or(Value::Null);
                self.header = Some(header.clone());
                Ok(header)
            }
            ResponseKind::Error => Err(remote_error(frame)),
            kind => Err(self.unexpected(kind)),
        }
    }

    /// Send one item and wait for the worker's answering item.
    pub fn exchange(&mut self, item: Value) -> Result<Value, CallError> {
        let frame = self.session.item_frame(&self.request_id, item);
        self.session.send_followup(frame)?;
        loop {
            let frame = self.session.next_frame(&self.method, &self.request_id)?;
            match frame.kind {
                ResponseKind::Header if self.header.is_none() => {
                    self.header = Some(frame.payload.unwrap_or(Value::Null));
                }
                ResponseKind::Item => return Ok(frame.payload.unwrap_or(Value::Null)),
                ResponseKind::Error => return Err(remote_error(frame)),
                kind => return Err(self.unexpected(kind)),
            }
        }
    }

    /// Half-close and wait for the worker to end the exchange.
    pub fn finish(self) -> Result<(), CallError> {
        let frame = self.session.end_frame(&self.request_id);
        self.session.send_followup(frame)?;
        let frame = self.session.next_frame(&self.method, &self.request_id)?;
        match frame.kind {
            ResponseKind::End => Ok(()),
            ResponseKind::Error => Err(remote_error(frame)),
            kind => Err(self.unexpected(kind)),
        }
    }

    fn unexpected(&self, kind: ResponseKind) -> CallError {
        CallError::UnexpectedFrame {
            method: self.method.clone(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, MockWorker};
    use crate::session::{MockTransport, ServiceDescriptor, SessionConfig};
    use probe_protocol::methods;
    use serde_json::json;
    use std::time::Duration;

    fn open(worker: MockWorker) -> Session {
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
    fn test_stream_yields_items_then_ends() {
        let mut session = open(MockWorker::new());
        let stream = session.server_stream(methods::COUNT_STREAM, json!({"n": 3})).unwrap();
        assert!(stream.header().is_none());
        let items = stream.collect_items().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], json!({"index": 2}));
    }

    #[test]
    fn test_stream_header_read_eagerly() {
        let mut session = open(MockWorker::new());
        let mut stream = session
            .server_stream(methods::COUNT_STREAM_WITH_HEADER, json!({"n": 2}))
            .unwrap();
        assert_eq!(stream.header(), Some(&json!({"total": 2})));
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_stream_stops_after_error() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::COUNT_STREAM, FailureConfig::hang());
        let mut session = open(worker);
        let result = session.server_stream(methods::COUNT_STREAM, json!({"n": 3}));
        assert!(matches!(result, Err(CallError::Timeout { .. })));
    }

    #[test]
    fn test_exchange_roundtrip() {
        let mut session = open(MockWorker::new());
        let mut exchange = session
            .exchange(methods::SCALE_EXCHANGE_WITH_HEADER, json!({"factor": 2.0}))
            .unwrap();
        assert_eq!(exchange.read_header().unwrap(), json!({"factor": 2.0}));
        assert_eq!(exchange.exchange(json!(1.0)).unwrap(), json!(2.0));
        assert_eq!(exchange.exchange(json!(3.0)).unwrap(), json!(6.0));
        exchange.finish().unwrap();
    }

    #[test]
    fn test_exchange_without_header_tolerates_late_header() {
        let mut session = open(MockWorker::new());
        let mut exchange = session
            .exchange(methods::SCALE_EXCHANGE_WITH_HEADER, json!({"factor": 3.0}))
            .unwrap();
        assert_eq!(exchange.exchange(json!(1.0)).unwrap(), json!(3.0));
        assert_eq!(exchange.header(), Some(&json!({"factor": 3.0})));
        exchange.finish().unwrap();
    }
}

//! Probe Session
//!
//! Typed remote-call surface over a [`Transport`]. Handles the handshake and
//! version negotiation, request ID correlation, in-band log collection, and
//! the two time bounds every wait is subject to: the per-call timeout and
//! the optional battery deadline.

use std::time::{Duration, Instant};

use probe_protocol::methods;
use probe_protocol::{
    CallMetadata, ErrorPayload, LogRecord, RequestFrame, ResponseFrame, ResponseKind,
    PROTOCOL_VERSION_HANDSHAKE,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};
use uuid::Uuid;

use super::error::{CallError, ConnectError};
use super::introspection::{AuthGrant, ServiceDescription};
use super::payload::{resolve_payload, ResolvedPayload};
use super::stream::{Exchange, ServerStream};
use super::transport::{Transport, TransportError};
use super::{ServiceDescriptor, SessionConfig};

/// Longest wait for the goodbye acknowledgement on close
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct HelloReply {
    service: String,
    protocol_min: i32,
    protocol_max: i32,
}

/// Live RPC session against one worker
pub struct Session {
    transport: Box<dyn Transport>,
    config: SessionConfig,
    session_id: String,
    service: String,
    negotiated_version: i32,
    request_counter: u64,
    metadata: CallMetadata,
    deadline: Option<Instant>,
    logs: Vec<LogRecord>,
    closed: bool,
}

impl Session {
    /// Perform the handshake and negotiate the protocol version.
    pub fn open(
        mut transport: Box<dyn Transport>,
        descriptor: &ServiceDescriptor,
        config: SessionConfig,
    ) -> Result<Self, ConnectError> {
        let session_id = Uuid::new_v4().to_string();
        let request_id = format!("{}-hello", &session_id[..8]);

        let hello = RequestFrame::call(
            PROTOCOL_VERSION_HANDSHAKE,
            request_id.clone(),
            methods::HELLO,
            json!({
                "service": descriptor.name,
                "protocol_min": descriptor.protocol_min,
                "protocol_max": descriptor.protocol_max,
            }),
        );
        transport.send(&hello)?;

        let deadline = Instant::now() + config.call_timeout;
        let reply = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectError::Timeout(config.call_timeout));
            }
            match transport.recv(remaining) {
                Ok(frame) if frame.request_id == request_id && frame.kind != ResponseKind::Log => {
                    break frame
                }
                Ok(frame) => trace!(request_id = %frame.request_id, "Discarding frame before handshake"),
                Err(TransportError::Timeout(_)) => {}
                Err(e) => return Err(e.into()),
            }
        };

        let hello: HelloReply = match reply.kind {
            ResponseKind::Result => {
                serde_json::from_value(reply.payload.unwrap_or(Value::Null))
                    .map_err(|e| ConnectError::Malformed(e.to_string()))?
            }
            ResponseKind::Error => {
                return Err(ConnectError::Rejected(reply.error.unwrap_or_else(|| {
                    ErrorPayload::new("Unknown", "handshake failed with no error details")
                })))
            }
            kind => {
                return Err(ConnectError::Malformed(format!(
                    "unexpected {:?} frame in handshake",
                    kind
                )))
            }
        };

        if hello.service != descriptor.name {
            return Err(ConnectError::ServiceMismatch {
                expected: descriptor.name.clone(),
                actual: hello.service,
            });
        }

        // Negotiate version: use max of intersection
        let intersection_min = descriptor.protocol_min.max(hello.protocol_min);
        let intersection_max = descriptor.protocol_max.min(hello.protocol_max);
        if intersection_min > intersection_max {
            return Err(ConnectError::VersionNegotiation {
                client_min: descriptor.protocol_min,
                client_max: descriptor.protocol_max,
                worker_min: hello.protocol_min,
                worker_max: hello.protocol_max,
            });
        }

        debug!(
            session_id = %session_id,
            service = %hello.service,
            protocol_version = intersection_max,
            "Session opened"
        );

        Ok(Self {
            transport,
            config,
            session_id,
            service: hello.service,
            negotiated_version: intersection_max,
            request_counter: 0,
            metadata: CallMetadata::default(),
            deadline: None,
            logs: Vec::new(),
            closed: false,
        })
    }

    /// Orderly shutdown; the worker process itself is left running.
    pub fn close(mut self) {
        self.shutdown();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn negotiated_version(&self) -> i32 {
        self.negotiated_version
    }

    /// Bound every wait by an absolute deadline (the battery budget).
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Propagate a W3C traceparent on every following request.
    pub fn set_traceparent(&mut self, traceparent: Option<String>) {
        self.metadata.traceparent = traceparent;
    }

    /// Drop the bearer token obtained by [`Session::authenticate`].
    pub fn clear_authorization(&mut self) {
        self.metadata.authorization = None;
    }

    /// Take the log records collected since the last call to this method.
    pub fn take_logs(&mut self) -> Vec<LogRecord> {
        std::mem::take(&mut self.logs)
    }

    // === Call surface ===

    /// Unary call returning a value (null if the worker sent none).
    pub fn unary(&mut self, method: &str, params: Value) -> Result<Value, CallError> {
        let request_id = self.start_call(method, params)?;
        let frame = self.next_frame(method, &request_id)?;
        match frame.kind {
            ResponseKind::Result => Ok(frame.payload.unwrap_or(Value::Null)),
            ResponseKind::Error => Err(remote_error(frame)),
            kind => Err(CallError::UnexpectedFrame {
                method: method.to_string(),
                kind,
            }),
        }
    }

    /// Unary call that must not return a value.
    pub fn void_call(&mut self, method: &str, params: Value) -> Result<(), CallError> {
        match self.unary(method, params)? {
            Value::Null => Ok(()),
            other => Err(CallError::malformed(
                method,
                format!("void method returned {}", other),
            )),
        }
    }

    /// Server-streaming call. The header, if any, is read eagerly.
    pub fn server_stream(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<ServerStream<'_>, CallError> {
        let request_id = self.start_call(method, params)?;
        ServerStream::open(self, method, request_id)
    }

    /// Open a bidirectional exchange.
    pub fn exchange(&mut self, method: &str, params: Value) -> Result<Exchange<'_>, CallError> {
        let request_id = self.start_call(method, params)?;
        Ok(Exchange::new(self, method, request_id))
    }

    /// Introspection: the worker's declared method list.
    pub fn describe(&mut self) -> Result<ServiceDescription, CallError> {
        let value = self.unary(methods::DESCRIBE, json!({}))?;
        serde_json::from_value(value).map_err(|e| CallError::malformed(methods::DESCRIBE, e.to_string()))
    }

    /// Authentication handshake. The granted token is attached to every
    /// following request until [`Session::clear_authorization`].
    pub fn authenticate(&mut self, scheme: &str, credentials: &str) -> Result<AuthGrant, CallError> {
        let value = self.unary(
            methods::AUTHENTICATE,
            json!({ "scheme": scheme, "credentials": credentials }),
        )?;
        let grant: AuthGrant = serde_json::from_value(value)
            .map_err(|e| CallError::malformed(methods::AUTHENTICATE, e.to_string()))?;
        self.metadata.authorization = Some(grant.token.clone());
        Ok(grant)
    }

    /// Unary call whose result is a byte payload, inline or externalized.
    pub fn fetch_payload(&mut self, method: &str, params: Value) -> Result<ResolvedPayload, CallError> {
        let value = self.unary(method, params)?;
        resolve_payload(&value)
    }

    // === Frame plumbing ===

    fn next_request_id(&mut self) -> String {
        self.request_counter += 1;
        format!("{}-{:04}", &self.session_id[..8], self.request_counter)
    }

    fn start_call(&mut self, method: &str, params: Value) -> Result<String, CallError> {
        let request_id = self.next_request_id();
        let frame = RequestFrame::call(self.negotiated_version, request_id.clone(), method, params);
        debug!(session_id = %self.session_id, request_id = %request_id, method, "Call");
        self.send(frame)?;
        Ok(request_id)
    }

    /// Send an exchange item or end frame for an open call.
    pub(super) fn send_followup(&mut self, frame: RequestFrame) -> Result<(), CallError> {
        self.send(frame)
    }

    fn send(&mut self, frame: RequestFrame) -> Result<(), CallError> {
        let frame = frame.with_metadata(self.metadata.clone());
        self.transport.send(&frame)?;
        Ok(())
    }

    pub(super) fn item_frame(&self, request_id: &str, payload: Value) -> RequestFrame {
        RequestFrame::item(self.negotiated_version, request_id, payload)
    }

    pub(super) fn end_frame(&self, request_id: &str) -> RequestFrame {
        RequestFrame::end(self.negotiated_version, request_id)
    }

    /// Wait for the next non-log frame of `request_id`.
    ///
    /// Frames of other requests are discarded; log frames are collected.
    pub(super) fn next_frame(
        &mut self,
        method: &str,
        request_id: &str,
    ) -> Result<ResponseFrame, CallError> {
        let call_deadline = Instant::now() + self.config.call_timeout;
        let (limit, by_budget) = match self.deadline {
            Some(deadline) if deadline < call_deadline => (deadline, true),
            _ => (call_deadline, false),
        };

        loop {
            let remaining = limit.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(if by_budget {
                    CallError::BudgetExhausted {
                        method: method.to_string(),
                    }
                } else {
                    CallError::Timeout {
                        method: method.to_string(),
                        timeout: self.config.call_timeout,
                    }
                });
            }

            let frame = match self.transport.recv(remaining) {
                Ok(frame) => frame,
                Err(TransportError::Timeout(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            if frame.request_id != request_id {
                debug!(
                    session_id = %self.session_id,
                    request_id = %frame.request_id,
                    expected = %request_id,
                    "Discarding stale frame"
                );
                continue;
            }

            if frame.kind == ResponseKind::Log {
                if let Some(record) = frame.log {
                    trace!(request_id = %request_id, message = %record.message, "Worker log");
                    self.logs.push(record);
                }
                continue;
            }

            return Ok(frame);
        }
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let budget_left = self
            .deadline
            .map_or(true, |deadline| deadline > Instant::now());
        if budget_left {
            let request_id = self.next_request_id();
            let goodbye =
                RequestFrame::call(self.negotiated_version, request_id.clone(), methods::GOODBYE, json!({}));
            if self.transport.send(&goodbye).is_ok() {
                let wait = self.config.call_timeout.min(CLOSE_ACK_TIMEOUT);
                let until = Instant::now() + wait;
                while let Some(remaining) = until.checked_duration_since(Instant::now()) {
                    match self.transport.recv(remaining) {
                        Ok(frame) if frame.request_id == request_id && frame.kind.is_terminal() => break,
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => break,
                        Err(_) => {}
                    }
                }
            }
        }

        self.transport.close();
        debug!(session_id = %self.session_id, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
        }
    }
}

pub(super) fn remote_error(frame: ResponseFrame) -> CallError {
    CallError::Remote(
        frame
            .error
            .unwrap_or_else(|| ErrorPayload::new("Unknown", "error frame without details")),
    )
}

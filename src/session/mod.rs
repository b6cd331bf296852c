//! Probe Session
//!
//! RPC client surface the probe battery is written against. A session wraps
//! a [`Transport`] (never a concrete process) so the same battery runs over
//! any byte-stream backing:
//! - `StdioTransport` for a worker subprocess
//! - `MockTransport` for the in-process mock worker
//!
//! Closing a session releases protocol-level resources only; the worker
//! process belongs to its `WorkerHandle`.

mod client;
mod error;
mod introspection;
mod payload;
mod stream;
mod transport;

use std::time::Duration;

use probe_protocol::{CONFORMANCE_SERVICE, PROTOCOL_MAX, PROTOCOL_MIN};

pub use client::Session;
pub use error::{CallError, ConnectError};
pub use introspection::{AuthGrant, MethodDescriptor, ParamDescriptor, ServiceDescription};
pub use payload::{resolve_payload, ExternalReference, ResolvedPayload};
pub use stream::{Exchange, ServerStream};
pub use transport::{MockTransport, StdioTransport, Transport, TransportError};

/// Service the session expects the worker to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub protocol_min: i32,
    pub protocol_max: i32,
}

impl ServiceDescriptor {
    /// The conformance service at the versions this client speaks
    pub fn conformance() -> Self {
        Self {
            name: CONFORMANCE_SERVICE.to_string(),
            protocol_min: PROTOCOL_MIN,
            protocol_max: PROTOCOL_MAX,
        }
    }
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self::conformance()
    }
}

/// Session configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Bound on every single wait for a response frame
    pub call_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(10_000),
        }
    }
}

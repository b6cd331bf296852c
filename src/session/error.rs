//! Session error types.

use std::time::Duration;

use probe_protocol::{ErrorPayload, ResponseKind};

use super::transport::TransportError;

/// Errors establishing a session
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("transport failed during handshake: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker serves '{actual}', expected '{expected}'")]
    ServiceMismatch { expected: String, actual: String },

    #[error(
        "no common protocol version: client [{client_min}, {client_max}], worker [{worker_min}, {worker_max}]"
    )]
    VersionNegotiation {
        client_min: i32,
        client_max: i32,
        worker_min: i32,
        worker_max: i32,
    },

    #[error("worker rejected handshake: {0}")]
    Rejected(ErrorPayload),

    #[error("malformed handshake reply: {0}")]
    Malformed(String),
}

/// Errors of a single remote call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("call '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("battery budget exhausted during '{method}'")]
    BudgetExhausted { method: String },

    #[error("remote error: {0}")]
    Remote(ErrorPayload),

    #[error("unexpected {kind:?} frame during '{method}'")]
    UnexpectedFrame { method: String, kind: ResponseKind },

    #[error("malformed response to '{method}': {reason}")]
    Malformed { method: String, reason: String },

    #[error("external payload rejected: {0}")]
    ExternalPayload(String),
}

impl CallError {
    /// Returns true for per-call timeouts and budget exhaustion
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. } | CallError::BudgetExhausted { .. })
    }

    /// Returns true if the battery budget ran out during this call
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, CallError::BudgetExhausted { .. })
    }

    /// Remote error payload, if the worker answered with an error
    pub fn remote(&self) -> Option<&ErrorPayload> {
        match self {
            CallError::Remote(payload) => Some(payload),
            _ => None,
        }
    }

    pub(crate) fn malformed(method: &str, reason: impl Into<String>) -> Self {
        CallError::Malformed {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let timeout = CallError::Timeout {
            method: "add".into(),
            timeout: Duration::from_millis(5),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_budget_exhausted());

        let budget = CallError::BudgetExhausted { method: "add".into() };
        assert!(budget.is_timeout());
        assert!(budget.is_budget_exhausted());

        let remote = CallError::Remote(ErrorPayload::new("RpcError", "boom"));
        assert!(!remote.is_timeout());
        assert_eq!(remote.remote().unwrap().kind, "RpcError");
    }

    #[test]
    fn test_error_messages() {
        let err = ConnectError::ServiceMismatch {
            expected: "ConformanceService".into(),
            actual: "Other".into(),
        };
        assert_eq!(err.to_string(), "worker serves 'Other', expected 'ConformanceService'");

        let err = CallError::malformed("add", "not a number");
        assert_eq!(err.to_string(), "malformed response to 'add': not a number");
    }
}

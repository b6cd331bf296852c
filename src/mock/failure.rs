//! Failure Injection for Mock Worker
//!
//! Supports configurable per-method failure injection for testing the
//! prober's fault isolation.

use std::collections::HashMap;
use std::time::Duration;

use probe_protocol::ErrorPayload;
use serde_json::Value;

/// Failure configuration for a method
#[derive(Debug, Clone, Default)]
pub struct FailureConfig {
    /// Error to return instead of the normal reply
    pub error: Option<ErrorPayload>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Never respond
    pub hang: bool,
    /// Replace the result value (a failing method returns normally with it)
    pub result: Option<Value>,
    /// Cut a stream short after this many items
    pub truncate: Option<usize>,
    /// Answer with a line that is not a frame
    pub garble: bool,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that returns an error
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorPayload::new(kind, message)),
            ..Default::default()
        }
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            delay: Some(duration),
            ..Default::default()
        }
    }

    /// Create a config that never answers
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    /// Create a config that answers with a wrong value
    pub fn wrong_result(value: Value) -> Self {
        Self {
            result: Some(value),
            ..Default::default()
        }
    }

    /// Create a config that truncates a stream
    pub fn truncate(items: usize) -> Self {
        Self {
            truncate: Some(items),
            ..Default::default()
        }
    }

    /// Create a config that answers with an undecodable line
    pub fn garbled() -> Self {
        Self {
            garble: true,
            ..Default::default()
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock worker
#[derive(Debug, Default)]
pub struct FailureInjector {
    /// Per-method failure configs
    configs: HashMap<String, FailureConfig>,
    /// Call counts per method (for fail_count tracking)
    call_counts: HashMap<String, u32>,
}

impl FailureInjector {
    /// Create a new failure injector
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for a method
    pub fn inject(&mut self, method: impl Into<String>, config: FailureConfig) {
        let method = method.into();
        self.call_counts.insert(method.clone(), 0);
        self.configs.insert(method, config);
    }

    /// Inject an error for a method
    pub fn inject_error(
        &mut self,
        method: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.inject(method, FailureConfig::error(kind, message));
    }

    /// Check if a failure should occur for a method call.
    /// Returns the failure config if one should occur, None otherwise
    pub fn check(&mut self, method: &str) -> Option<FailureConfig> {
        let config = self.configs.get(method)?;
        let count = self.call_counts.entry(method.to_string()).or_insert(0);
        *count += 1;

        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return None;
            }
        }

        Some(config.clone())
    }

    /// Return the failure currently in effect for a method without counting a call.
    pub fn peek(&self, method: &str) -> Option<FailureConfig> {
        let config = self.configs.get(method)?;
        let count = self.call_counts.get(method).copied().unwrap_or(0);
        match config.fail_count {
            Some(fail_limit) if count > fail_limit => None,
            _ => Some(config.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_config_error() {
        let config = FailureConfig::error("RpcError", "Test message");
        let error = config.error.unwrap();
        assert_eq!(error.kind, "RpcError");
        assert_eq!(error.message, "Test message");
        assert!(!config.hang);
    }

    #[test]
    fn test_failure_injector_basic() {
        let mut injector = FailureInjector::new();

        assert!(injector.check("add").is_none());

        injector.inject_error("add", "RpcError", "broken");
        let config = injector.check("add");
        assert!(config.is_some());
        assert!(injector.check("void_method").is_none());
    }

    #[test]
    fn test_failure_injector_fail_count() {
        let mut injector = FailureInjector::new();

        // Fail twice, then succeed
        injector.inject("count_stream", FailureConfig::truncate(2).with_fail_count(2));

        assert!(injector.check("count_stream").is_some());
        assert!(injector.check("count_stream").is_some());
        assert!(injector.check("count_stream").is_none());
        assert!(injector.peek("count_stream").is_none());
    }

    #[test]
    fn test_peek_does_not_count() {
        let mut injector = FailureInjector::new();
        injector.inject("scale_exchange", FailureConfig::hang().with_fail_count(1));

        assert!(injector.peek("scale_exchange").is_some());
        assert!(injector.peek("scale_exchange").is_some());
        assert!(injector.check("scale_exchange").is_some());
        assert!(injector.peek("scale_exchange").is_some());
        assert!(injector.check("scale_exchange").is_none());
    }

    #[test]
    fn test_reinject_resets_fail_count() {
        let mut injector = FailureInjector::new();

        injector.inject("add", FailureConfig::hang().with_fail_count(1));
        assert!(injector.check("add").is_some());
        assert!(injector.check("add").is_none());

        injector.inject("add", FailureConfig::hang().with_fail_count(1));
        assert!(injector.check("add").is_some());
    }
}

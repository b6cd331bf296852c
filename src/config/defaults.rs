//! Built-in probe defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Per-call response timeout in milliseconds (default: 10000)
    pub call_timeout_ms: u64,

    /// Wall-clock budget for one battery in seconds (default: 60)
    pub battery_budget_seconds: u64,

    /// Grace between asking a worker to stop and killing it (default: 2000)
    pub release_grace_ms: u64,

    /// How long a fresh worker must survive to count as launched (default: 100)
    pub readiness_ms: u64,

    /// Build command timeout in seconds (default: 120)
    pub build_timeout_seconds: u64,

    /// Version command timeout in seconds (default: 30)
    pub version_timeout_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            battery_budget_seconds: 60,
            release_grace_ms: 2_000,
            readiness_ms: 100,
            build_timeout_seconds: 120,
            version_timeout_seconds: 30,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to a JSON value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "call_timeout_ms": self.call_timeout_ms,
            "battery_budget_seconds": self.battery_budget_seconds,
            "release_grace_ms": self.release_grace_ms,
            "readiness_ms": self.readiness_ms,
            "build_timeout_seconds": self.build_timeout_seconds,
            "version_timeout_seconds": self.version_timeout_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_value_has_every_key() {
        let value = BuiltinDefaults::default().to_value();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 6);
        assert_eq!(value["call_timeout_ms"], 10_000);
        assert_eq!(value["battery_budget_seconds"], 60);
        assert_eq!(value["readiness_ms"], 100);
    }
}

//! Effective probe settings with provenance
//!
//! The merged settings plus the list of sources that contributed to them.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::engine::EngineConfig;
use crate::session::SessionConfig;
use crate::worker::HandleConfig;

/// Table in the inventory file that carries probe settings
pub const PROBE_TABLE: &str = "probe";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid probe settings: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("{key} must be in {range}, got {value}")]
    OutOfRange {
        key: &'static str,
        range: &'static str,
        value: u64,
    },
}

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Inventory,
    Cli,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Validated probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSettings {
    pub call_timeout_ms: u64,
    pub battery_budget_seconds: u64,
    pub release_grace_ms: u64,
    pub readiness_ms: u64,
    pub build_timeout_seconds: u64,
    pub version_timeout_seconds: u64,
}

fn check(key: &'static str, value: u64, min: u64, max: u64, range: &'static str) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { key, range, value });
    }
    Ok(())
}

impl ProbeSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("call_timeout_ms", self.call_timeout_ms, 1, 600_000, "(0, 600000]")?;
        check("battery_budget_seconds", self.battery_budget_seconds, 1, 3_600, "(0, 3600]")?;
        check("release_grace_ms", self.release_grace_ms, 0, 60_000, "[0, 60000]")?;
        check("readiness_ms", self.readiness_ms, 0, 10_000, "[0, 10000]")?;
        check("build_timeout_seconds", self.build_timeout_seconds, 1, 86_400, "(0, 86400]")?;
        check("version_timeout_seconds", self.version_timeout_seconds, 1, 3_600, "(0, 3600]")?;
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_seconds)
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_secs(self.version_timeout_seconds)
    }

    /// Engine configuration for these settings
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            handle: HandleConfig {
                readiness: Duration::from_millis(self.readiness_ms),
                release_grace: Duration::from_millis(self.release_grace_ms),
            },
            session: SessionConfig {
                call_timeout: Duration::from_millis(self.call_timeout_ms),
            },
            battery_budget: Duration::from_secs(self.battery_budget_seconds),
            ..EngineConfig::default()
        }
    }
}

/// Merged settings and where they came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub settings: ProbeSettings,
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Merge builtin defaults, the inventory's `[probe]` table and CLI overrides.
    pub fn build(inventory_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = inventory_path {
            let (document, digest) = load_toml_file(path)?;
            if let Some(probe) = document.get(PROBE_TABLE) {
                layers.push(probe.clone());
            }
            sources.push(ConfigSource {
                origin: ConfigOrigin::Inventory,
                path: Some(path.display().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides.filter(|v| v.as_object().map_or(false, |m| !m.is_empty())) {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let settings: ProbeSettings = serde_json::from_value(merge_layers(layers))?;
        settings.validate()?;
        Ok(Self { settings, sources })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Read a TOML file as JSON, with the SHA-256 of its raw bytes
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let parse_err = |reason: String| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_err(format!("invalid UTF-8: {}", e)))?;
    let document: toml::Value = toml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?;
    Ok((toml_to_json(document), digest))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect()),
    }
}

//! Persisted capability snapshot.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::record::CapabilityRecord;

/// Snapshot persistence errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Capability records for every implementation of one orchestration pass,
/// in the order they were first inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub generated_at: DateTime<Utc>,
    pub languages: IndexMap<String, CapabilityRecord>,
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilitySnapshot {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            languages: IndexMap::new(),
        }
    }

    /// Insert a record, replacing any prior record for the same name.
    ///
    /// A replaced record keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, record: CapabilityRecord) -> Option<CapabilityRecord> {
        self.languages.insert(name.into(), record)
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityRecord> {
        self.languages.get(name)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// Summary lines in insertion order
    pub fn summary_lines(&self) -> Vec<String> {
        self.languages
            .iter()
            .map(|(name, record)| record.summary_line(name))
            .collect()
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write pretty JSON plus a trailing newline, creating parent directories
    pub fn write_to_file(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut json = self.to_json()?;
        json.push('\n');
        let write_err = |source| SnapshotError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, json).map_err(write_err)
    }

    pub fn from_file(path: &Path) -> Result<Self, SnapshotError> {
        let json = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{Catalog, ProbeCategory};
    use crate::capability::{merge, Identity, TransportCapabilities};
    use crate::runner::ProbeResult;

    fn record(version: &str) -> CapabilityRecord {
        merge(
            Identity {
                version: Some(version.into()),
                repo: "repo".into(),
                ..Default::default()
            },
            TransportCapabilities::default(),
            ProbeResult::zero(&Catalog::standard()),
        )
    }

    #[test]
    fn test_insert_replaces() {
        let mut snapshot = CapabilitySnapshot::new();
        assert!(snapshot.insert("go", record("0.1")).is_none());
        let previous = snapshot.insert("go", record("0.2"));
        assert_eq!(previous.and_then(|r| r.version).as_deref(), Some("0.1"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("go").and_then(|r| r.version.as_deref()), Some("0.2"));
    }

    #[test]
    fn test_write_creates_parents_and_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("capabilities.json");

        let mut snapshot = CapabilitySnapshot::new();
        snapshot.insert("rust", record("1.0"));
        snapshot.write_to_file(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["generated_at"].is_string());
        assert_eq!(value["languages"]["rust"]["version"], "1.0");

        let loaded = CapabilitySnapshot::from_file(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_summary_lines_follow_insertion_order() {
        let mut snapshot = CapabilitySnapshot::new();
        for name in ["python", "typescript", "go", "cpp"] {
            snapshot.insert(name, record("1"));
        }
        snapshot.insert("typescript", record("2"));

        let names: Vec<String> = snapshot
            .summary_lines()
            .iter()
            .map(|line| line.split(':').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, ["python", "typescript", "go", "cpp"]);
        assert_eq!(snapshot.get("typescript").and_then(|r| r.version.as_deref()), Some("2"));
    }

    fn positions(json: &str, keys: &[&str]) -> Vec<usize> {
        keys.iter()
            .map(|key| json.find(&format!("\"{}\":", key)).unwrap())
            .collect()
    }

    fn ascending(positions: &[usize]) -> bool {
        positions.windows(2).all(|pair| pair[0] < pair[1])
    }

    #[test]
    fn test_serialized_key_order() {
        let mut snapshot = CapabilitySnapshot::new();
        for name in ["python", "typescript", "go", "cpp"] {
            snapshot.insert(name, record("1"));
        }
        let json = snapshot.to_json().unwrap();

        assert!(ascending(&positions(&json, &["python", "typescript", "go", "cpp"])));
        assert!(ascending(&positions(
            &json,
            &["pipe", "subprocess", "unix_socket", "shared_memory", "http", "worker_pool"]
        )));

        let catalog = Catalog::standard();
        for category in [ProbeCategory::CallPattern, ProbeCategory::Feature] {
            let ids: Vec<&str> = catalog.ids(category).collect();
            assert!(ascending(&positions(&json, &ids)), "{:?} out of order", ids);
        }

        let loaded = CapabilitySnapshot::from_json(&json).unwrap();
        let names: Vec<&str> = loaded.languages.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["python", "typescript", "go", "cpp"]);
    }
}

//! Implementation Inventory
//!
//! Declarative description of every implementation under test: where its
//! checkout lives, how to build it, how to launch its worker, how to read
//! its version, and which transports it is known to support. Adding an
//! implementation means adding a record, never a code path.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::capability::{Identity, TransportCapabilities, TransportKind};
use crate::worker::LaunchCommand;

/// Prefix of the default checkout directory name
pub const CHECKOUT_PREFIX: &str = "vgi-rpc-";

/// Inventory file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationInventory {
    #[serde(default, rename = "implementation")]
    pub implementations: Vec<ImplementationEntry>,

    /// Probe settings layer, consumed by the config merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<toml::Table>,
}

/// One implementation record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImplementationEntry {
    /// Unique name across the inventory
    pub name: String,

    /// Source repository URL
    pub repo: String,

    pub docs: Option<String>,

    pub package_url: Option<String>,

    /// Checkout directory under the repos dir (default: `vgi-rpc-<name>`)
    pub checkout: Option<String>,

    pub build_cmd: Option<Vec<String>>,

    pub worker_cmd: Option<Vec<String>>,

    pub version_cmd: Option<Vec<String>>,

    /// Regex with one capture group applied to the version command output
    pub version_pattern: Option<String>,

    /// Statically known transport support; missing keys are false
    #[serde(default)]
    pub transports: BTreeMap<String, bool>,
}

/// Inventory loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("failed to read inventory file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse inventory: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate implementation name: '{0}'")]
    DuplicateName(String),

    #[error("implementation name must not be empty")]
    EmptyName,

    #[error("implementation '{name}': '{field}' must not be empty")]
    EmptyCommand { name: String, field: &'static str },

    #[error("implementation '{name}': invalid version_pattern: {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("implementation '{name}': unknown transport '{transport}'")]
    UnknownTransport { name: String, transport: String },
}

impl ImplementationInventory {
    /// Load and validate an inventory file
    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate an inventory from TOML
    pub fn parse(content: &str) -> Result<Self, InventoryError> {
        let inventory: ImplementationInventory = toml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<(), InventoryError> {
        let mut seen = HashSet::new();
        for entry in &self.implementations {
            if !seen.insert(entry.name.as_str()) {
                return Err(InventoryError::DuplicateName(entry.name.clone()));
            }
        }
        self.implementations.iter().try_for_each(ImplementationEntry::validate)
    }

    pub fn get(&self, name: &str) -> Option<&ImplementationEntry> {
        self.implementations.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.implementations.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}

impl ImplementationEntry {
    fn validate(&self) -> Result<(), InventoryError> {
        if self.name.trim().is_empty() {
            return Err(InventoryError::EmptyName);
        }

        let commands = [
            ("build_cmd", &self.build_cmd),
            ("worker_cmd", &self.worker_cmd),
            ("version_cmd", &self.version_cmd),
        ];
        for (field, cmd) in commands {
            if cmd.as_ref().map_or(false, |argv| argv.first().map_or(true, |p| p.is_empty())) {
                return Err(InventoryError::EmptyCommand {
                    name: self.name.clone(),
                    field,
                });
            }
        }

        if self.version_pattern.is_some() {
            self.version_regex()?;
        }

        for transport in self.transports.keys() {
            if transport.parse::<TransportKind>().is_err() {
                return Err(InventoryError::UnknownTransport {
                    name: self.name.clone(),
                    transport: transport.clone(),
                });
            }
        }
        Ok(())
    }

    /// Compiled version pattern, if any
    pub fn version_regex(&self) -> Result<Option<Regex>, InventoryError> {
        let Some(pattern) = &self.version_pattern else {
            return Ok(None);
        };
        let invalid = |reason: String| InventoryError::InvalidPattern {
            name: self.name.clone(),
            reason,
        };
        let regex = Regex::new(pattern).map_err(|e| invalid(e.to_string()))?;
        // captures_len counts the implicit whole-match group
        if regex.captures_len() != 2 {
            return Err(invalid("expected exactly one capture group".to_string()));
        }
        Ok(Some(regex))
    }

    /// Checkout directory name under the repos dir
    pub fn checkout_dir_name(&self) -> String {
        self.checkout
            .clone()
            .unwrap_or_else(|| format!("{}{}", CHECKOUT_PREFIX, self.name))
    }

    pub fn checkout_path(&self, repos_dir: &Path) -> PathBuf {
        repos_dir.join(self.checkout_dir_name())
    }

    pub fn worker_launch(&self) -> Option<LaunchCommand> {
        self.worker_cmd.as_deref().and_then(LaunchCommand::from_argv)
    }

    /// Declared transports, fully keyed
    pub fn transport_capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::from_declared(
            self.transports
                .iter()
                .filter_map(|(key, supported)| key.parse::<TransportKind>().ok().map(|kind| (kind, *supported))),
        )
    }

    /// Identity metadata with the given extracted version
    pub fn identity(&self, version: Option<String>) -> Identity {
        Identity {
            version,
            repo: self.repo.clone(),
            docs: self.docs.clone(),
            package_url: self.package_url.clone(),
        }
    }
}

//! Orchestration
//!
//! Walks the inventory in order and produces one capability record per
//! implementation: version, build, probe, merge. Every implementation gets
//! a record; anything that keeps it from being probed yields the zero
//! result next to a diagnostic explaining why.

mod command;
mod steps;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::capability::{merge, CapabilityRecord, CapabilitySnapshot};
use crate::config::ProbeSettings;
use crate::engine::{ImplementationTarget, ProbeEngine};
use crate::inventory::{ImplementationEntry, ImplementationInventory};
use crate::runner::{ProbeResult, RunReport};

pub use command::{run_command, CommandError, CommandOutput};
pub use steps::{extract_version, BuildStep, CommandBuild, CommandVersion, VersionSource};

/// Why an implementation was or was not probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProbeStage {
    /// Checkout directory does not exist
    MissingCheckout { path: String },
    /// Build command failed
    BuildFailed { reason: String },
    /// No worker command is declared
    NoWorker,
    /// Worker could not be launched or connected
    Unprobed { reason: String },
    /// The battery ran
    Probed,
}

/// Per-implementation diagnostics for one pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationDiagnostics {
    pub name: String,
    #[serde(flatten)]
    pub stage: ProbeStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

/// Diagnostics file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub catalog_version: u32,
    pub implementations: Vec<ImplementationDiagnostics>,
}

impl DiagnosticsReport {
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;
        json.push('\n');
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)
    }
}

/// Snapshot plus diagnostics for one pass
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub snapshot: CapabilitySnapshot,
    pub diagnostics: DiagnosticsReport,
}

/// Sequential orchestration over an inventory
pub struct Orchestrator {
    engine: ProbeEngine,
    repos_dir: PathBuf,
    build: Box<dyn BuildStep>,
    versions: Box<dyn VersionSource>,
}

impl Orchestrator {
    /// Orchestrator with command-backed build and version steps
    pub fn new(engine: ProbeEngine, repos_dir: impl Into<PathBuf>, settings: &ProbeSettings) -> Self {
        Self {
            engine,
            repos_dir: repos_dir.into(),
            build: Box::new(CommandBuild {
                timeout: settings.build_timeout(),
            }),
            versions: Box::new(CommandVersion {
                timeout: settings.version_timeout(),
            }),
        }
    }

    pub fn with_build_step(mut self, build: Box<dyn BuildStep>) -> Self {
        self.build = build;
        self
    }

    pub fn with_version_source(mut self, versions: Box<dyn VersionSource>) -> Self {
        self.versions = versions;
        self
    }

    /// Run one pass over every implementation, in inventory order.
    pub fn run(&self, inventory: &ImplementationInventory) -> PassOutcome {
        let mut snapshot = CapabilitySnapshot::new();
        let mut implementations = Vec::with_capacity(inventory.len());

        for entry in &inventory.implementations {
            let (record, diagnostics) = self.probe_entry(entry);
            info!("{}", record.summary_line(&entry.name));
            snapshot.insert(entry.name.clone(), record);
            implementations.push(diagnostics);
        }

        PassOutcome {
            snapshot,
            diagnostics: DiagnosticsReport {
                generated_at: Utc::now(),
                catalog_version: self.engine.catalog().version(),
                implementations,
            },
        }
    }

    /// Produce the record for one implementation.
    pub fn probe_entry(&self, entry: &ImplementationEntry) -> (CapabilityRecord, ImplementationDiagnostics) {
        let span = info_span!("implementation", implementation = %entry.name);
        let _enter = span.enter();

        let checkout = entry.checkout_path(&self.repos_dir);
        let zero = || ProbeResult::zero(self.engine.catalog());
        let finish = |version: Option<String>, result: ProbeResult, stage: ProbeStage, report: Option<RunReport>| {
            let record = merge(entry.identity(version), entry.transport_capabilities(), result);
            let diagnostics = ImplementationDiagnostics {
                name: entry.name.clone(),
                stage,
                report,
            };
            (record, diagnostics)
        };

        if !checkout.is_dir() {
            warn!(path = %checkout.display(), "Checkout not found; recording zero capabilities");
            let stage = ProbeStage::MissingCheckout {
                path: checkout.display().to_string(),
            };
            return finish(None, zero(), stage, None);
        }

        let version = self.versions.version(entry, &checkout);
        info!(version = version.as_deref().unwrap_or("unknown"), "Resolved version");

        if let Err(e) = self.build.build(entry, &checkout) {
            warn!(error = %e, "Build failed; skipping probe");
            let stage = ProbeStage::BuildFailed { reason: e.to_string() };
            return finish(version, zero(), stage, None);
        }

        let Some(launch) = entry.worker_launch() else {
            info!("No worker command; recording zero probe result");
            return finish(version, zero(), ProbeStage::NoWorker, None);
        };

        let target = ImplementationTarget {
            name: entry.name.clone(),
            launch,
            working_dir: checkout,
        };
        let outcome = self.engine.probe(&target);
        let stage = match &outcome.error {
            Some(e) => ProbeStage::Unprobed { reason: e.to_string() },
            None => ProbeStage::Probed,
        };
        finish(version, outcome.result, stage, outcome.report)
    }
}

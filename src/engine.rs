//! Conformance Probe Engine
//!
//! Probes one implementation end to end: acquire the worker, open a
//! session, run the battery, close the session, release the worker. Launch
//! and connect failures surface once as an error next to the all-false
//! result; nothing below the probe boundary ever escapes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn};

use crate::battery::Catalog;
use crate::runner::{ProbeResult, ProbeRunner, RunReport};
use crate::session::{
    ConnectError, ServiceDescriptor, Session, SessionConfig, StdioTransport, Transport,
    TransportError,
};
use crate::worker::{HandleConfig, LaunchCommand, LaunchError, WorkerHandle};

/// One implementation under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementationTarget {
    /// Logical name
    pub name: String,
    pub launch: LaunchCommand,
    pub working_dir: PathBuf,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub handle: HandleConfig,
    pub session: SessionConfig,
    pub service: ServiceDescriptor,
    /// Wall-clock bound on one battery run
    pub battery_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handle: HandleConfig::default(),
            session: SessionConfig::default(),
            service: ServiceDescriptor::conformance(),
            battery_budget: Duration::from_secs(60),
        }
    }
}

/// Reasons an implementation could not be probed at all
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("worker streams unavailable: {0}")]
    Transport(#[from] TransportError),

    #[error("session handshake failed: {0}")]
    Connect(#[from] ConnectError),
}

/// Result of probing one implementation
#[derive(Debug)]
pub struct EngineOutcome {
    /// Always fully keyed; all false when `error` is set
    pub result: ProbeResult,
    /// Present when the battery ran
    pub report: Option<RunReport>,
    /// Present when the battery could not run
    pub error: Option<EngineError>,
}

impl EngineOutcome {
    fn unprobed(catalog: &Catalog, error: EngineError) -> Self {
        Self {
            result: ProbeResult::zero(catalog),
            report: None,
            error: Some(error),
        }
    }

    fn probed(report: RunReport) -> Self {
        Self {
            result: report.result.clone(),
            report: Some(report),
            error: None,
        }
    }

    /// Returns true if the battery ran
    pub fn was_probed(&self) -> bool {
        self.report.is_some()
    }

    fn budget_exhausted(&self) -> bool {
        self.report.as_ref().map_or(false, |r| r.budget_exhausted)
    }
}

/// Probes implementations with a shared, immutable catalog
#[derive(Debug, Clone)]
pub struct ProbeEngine {
    catalog: Arc<Catalog>,
    config: EngineConfig,
}

impl ProbeEngine {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Launch the target's worker and probe it.
    pub fn probe(&self, target: &ImplementationTarget) -> EngineOutcome {
        let span = info_span!("probe", implementation = %target.name);
        let _enter = span.enter();

        info!(command = %target.launch.display(), dir = %target.working_dir.display(), "Launching worker");
        let mut handle = match WorkerHandle::acquire(&target.launch, &target.working_dir, self.config.handle) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Worker could not be launched");
                return EngineOutcome::unprobed(&self.catalog, e.into());
            }
        };

        let outcome = match StdioTransport::from_handle(&mut handle) {
            Ok(transport) => self.probe_transport(Box::new(transport)),
            Err(e) => EngineOutcome::unprobed(&self.catalog, e.into()),
        };

        // A call may still be blocked in the worker; do not wait for it
        if outcome.budget_exhausted() {
            handle.force_terminate();
        } else {
            handle.release();
        }
        outcome
    }

    /// Open a session over an already connected transport and run the battery.
    pub fn probe_transport(&self, transport: Box<dyn Transport>) -> EngineOutcome {
        let mut session = match Session::open(transport, &self.config.service, self.config.session) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session could not be opened");
                return EngineOutcome::unprobed(&self.catalog, e.into());
            }
        };

        let report = ProbeRunner::new(&self.catalog, self.config.battery_budget).run(&mut session);
        info!(
            session_id = %session.session_id(),
            patterns = report.result.passed_patterns(),
            features = report.result.passed_features(),
            budget_exhausted = report.budget_exhausted,
            duration_ms = report.duration_ms,
            "Battery complete"
        );

        session.close();
        EngineOutcome::probed(report)
    }
}

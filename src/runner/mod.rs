//! Probe Runner
//!
//! Executes a catalog against one session, once, in catalog order:
//! - every probe runs inside a failure boundary (faults and panics become `false`)
//! - the whole run is bounded by one wall-clock budget
//! - once the budget is spent the run concludes and unattempted probes stay `false`
//!
//! A runner is idle until `run` consumes it; the returned [`RunReport`] is
//! the completed state. Runs are never retried here; re-probing is the
//! caller's decision.

mod result;

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::battery::{Catalog, ProbeDefinition, ProbeFault};
use crate::session::Session;
use crate::timeout::BudgetEnforcer;

pub use result::{ProbeRecord, ProbeResult, ProbeStatus, RunReport};

/// Drives one catalog over one session
#[derive(Debug)]
pub struct ProbeRunner<'c> {
    catalog: &'c Catalog,
    budget: Duration,
}

impl<'c> ProbeRunner<'c> {
    pub fn new(catalog: &'c Catalog, budget: Duration) -> Self {
        Self { catalog, budget }
    }

    /// Run every probe once. Consumes the runner.
    ///
    /// When the budget runs out the session keeps the expired deadline, so
    /// nothing more is waited for on it; otherwise the previous deadline is
    /// restored.
    pub fn run(self, session: &mut Session) -> RunReport {
        let enforcer = BudgetEnforcer::start(self.budget);
        let previous_deadline = session.deadline();
        session.set_deadline(Some(enforcer.deadline()));

        let mut records = Vec::with_capacity(self.catalog.len());
        let mut budget_exhausted = false;

        for probe in self.catalog.probes() {
            if budget_exhausted || enforcer.check().is_exhausted() {
                budget_exhausted = true;
                records.push(record(probe, ProbeStatus::NotAttempted, Duration::ZERO));
                continue;
            }

            let started = Instant::now();
            let status = run_isolated(probe, session);
            let elapsed = started.elapsed();

            match &status {
                ProbeStatus::Passed => debug!(probe = probe.id, "Probe passed"),
                ProbeStatus::Failed => info!(probe = probe.id, "Probe failed"),
                ProbeStatus::Faulted { reason } => info!(probe = probe.id, %reason, "Probe faulted"),
                ProbeStatus::TimedOut { reason } => warn!(probe = probe.id, %reason, "Probe timed out"),
                ProbeStatus::NotAttempted => {}
            }

            if matches!(status, ProbeStatus::TimedOut { .. }) && enforcer.check().is_exhausted() {
                budget_exhausted = true;
            }
            records.push(record(probe, status, elapsed));
        }

        if budget_exhausted {
            warn!(
                budget_ms = self.budget.as_millis() as u64,
                "Battery budget exhausted; remaining probes recorded as not attempted"
            );
        } else {
            session.set_deadline(previous_deadline);
        }

        RunReport {
            catalog_version: self.catalog.version(),
            result: ProbeResult::from_records(self.catalog, &records),
            records,
            budget_exhausted,
            duration_ms: enforcer.elapsed().as_millis() as u64,
        }
    }
}

fn record(probe: &ProbeDefinition, status: ProbeStatus, elapsed: Duration) -> ProbeRecord {
    ProbeRecord {
        id: probe.id.to_string(),
        category: probe.category,
        status,
        duration_ms: elapsed.as_millis() as u64,
    }
}

/// Run one probe inside the failure boundary.
fn run_isolated(probe: &ProbeDefinition, session: &mut Session) -> ProbeStatus {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (probe.run)(&mut *session)))
        .unwrap_or_else(|payload| Err(ProbeFault::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(true) => ProbeStatus::Passed,
        Ok(false) => ProbeStatus::Failed,
        Err(fault) if fault.is_timeout() => ProbeStatus::TimedOut {
            reason: fault.to_string(),
        },
        Err(fault) => ProbeStatus::Faulted {
            reason: fault.to_string(),
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! Probe Battery
//!
//! A fixed, versioned catalog of independent probes. Each probe is a plain
//! function from a [`Session`] to a [`ProbeOutcome`]: `Ok(true)` when the
//! capability works, `Ok(false)` when the worker answered but the answer was
//! wrong, `Err(ProbeFault)` when the call itself failed. The runner maps
//! both `Ok(false)` and faults to `false` in the result.
//!
//! The catalog is an explicit immutable value; nothing in it is mutated
//! after construction.

pub mod features;
pub mod patterns;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{CallError, Session};

/// Version of the standard catalog (probe ids, inputs and expectations)
pub const CATALOG_VERSION: u32 = 1;

/// Numeric tolerance for floating point expectations
pub const FLOAT_TOLERANCE: f64 = 0.001;

/// Which mapping of the result a probe's key lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCategory {
    CallPattern,
    Feature,
}

impl fmt::Display for ProbeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeCategory::CallPattern => write!(f, "pattern"),
            ProbeCategory::Feature => write!(f, "feature"),
        }
    }
}

/// Failure while executing a single probe
#[derive(Debug, thiserror::Error)]
pub enum ProbeFault {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("probe panicked: {0}")]
    Panicked(String),
}

impl ProbeFault {
    /// Returns true if the probe ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeFault::Call(e) if e.is_timeout())
    }

    /// Returns true if the battery budget ran out during the probe
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, ProbeFault::Call(e) if e.is_budget_exhausted())
    }
}

/// Outcome of one probe
pub type ProbeOutcome = Result<bool, ProbeFault>;

/// Probe entry point
pub type ProbeFn = fn(&mut Session) -> ProbeOutcome;

/// One catalog entry
#[derive(Clone, Copy)]
pub struct ProbeDefinition {
    pub id: &'static str,
    pub category: ProbeCategory,
    pub description: &'static str,
    pub run: ProbeFn,
}

impl fmt::Debug for ProbeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeDefinition")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish()
    }
}

/// Catalog construction errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate probe id '{0}'")]
    DuplicateId(String),

    #[error("empty probe id")]
    EmptyId,
}

/// Ordered, immutable probe catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    version: u32,
    probes: Vec<ProbeDefinition>,
}

impl Catalog {
    /// Build a catalog; probe ids must be unique.
    pub fn new(version: u32, probes: Vec<ProbeDefinition>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for probe in &probes {
            if probe.id.is_empty() {
                return Err(CatalogError::EmptyId);
            }
            if !seen.insert(probe.id) {
                return Err(CatalogError::DuplicateId(probe.id.to_string()));
            }
        }
        Ok(Self { version, probes })
    }

    /// The standard catalog: call patterns first, then features.
    pub fn standard() -> Self {
        let probes = patterns::definitions()
            .into_iter()
            .chain(features::definitions())
            .collect();
        Self {
            version: CATALOG_VERSION,
            probes,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Probes in execution order
    pub fn probes(&self) -> &[ProbeDefinition] {
        &self.probes
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probe ids of one category, in catalog order
    pub fn ids(&self, category: ProbeCategory) -> impl Iterator<Item = &'static str> + '_ {
        self.probes
            .iter()
            .filter(move |p| p.category == category)
            .map(|p| p.id)
    }

    pub fn get(&self, id: &str) -> Option<&ProbeDefinition> {
        self.probes.iter().find(|p| p.id == id)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Structural equality where numbers compare by value (`2` equals `2.0`).
pub(crate) fn same_value(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < FLOAT_TOLERANCE,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).map_or(false, |y| same_value(x, y)))
        }
        _ => left == right,
    }
}

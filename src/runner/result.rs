//! Probe result and per-probe diagnostics.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::battery::{Catalog, ProbeCategory};

/// Outcome of one probe in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    /// Ran and the expectation held
    Passed,
    /// Ran and the expectation did not hold
    Failed,
    /// The call failed or the probe panicked
    Faulted { reason: String },
    /// The call or the battery budget timed out
    TimedOut { reason: String },
    /// The budget ran out before the probe started
    NotAttempted,
}

impl ProbeStatus {
    pub fn passed(&self) -> bool {
        matches!(self, ProbeStatus::Passed)
    }
}

/// Diagnostic record for one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub id: String,
    pub category: ProbeCategory,
    #[serde(flatten)]
    pub status: ProbeStatus,
    pub duration_ms: u64,
}

/// Pass/fail matrix keyed by every catalog id, in catalog order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub patterns: IndexMap<String, bool>,
    pub features: IndexMap<String, bool>,
}

impl ProbeResult {
    /// All-false result for a catalog (implementation could not be probed)
    pub fn zero(catalog: &Catalog) -> Self {
        let keys = |category| {
            catalog
                .ids(category)
                .map(|id| (id.to_string(), false))
                .collect::<IndexMap<_, _>>()
        };
        Self {
            patterns: keys(ProbeCategory::CallPattern),
            features: keys(ProbeCategory::Feature),
        }
    }

    /// Fold diagnostic records into the boolean matrix.
    ///
    /// Keys come from the catalog; records for unknown ids are ignored and
    /// missing records stay false.
    pub fn from_records(catalog: &Catalog, records: &[ProbeRecord]) -> Self {
        let mut result = Self::zero(catalog);
        for record in records {
            let map = match record.category {
                ProbeCategory::CallPattern => &mut result.patterns,
                ProbeCategory::Feature => &mut result.features,
            };
            if let Some(slot) = map.get_mut(&record.id) {
                *slot = record.status.passed();
            }
        }
        result
    }

    /// Returns true if the keys are exactly the catalog's ids, in catalog order
    pub fn matches_catalog(&self, catalog: &Catalog) -> bool {
        let same = |map: &IndexMap<String, bool>, category| map.keys().map(String::as_str).eq(catalog.ids(category));
        same(&self.patterns, ProbeCategory::CallPattern) && same(&self.features, ProbeCategory::Feature)
    }

    pub fn passed_patterns(&self) -> usize {
        self.patterns.values().filter(|v| **v).count()
    }

    pub fn passed_features(&self) -> usize {
        self.features.values().filter(|v| **v).count()
    }

    /// Returns true if nothing passed
    pub fn is_zero(&self) -> bool {
        self.passed_patterns() == 0 && self.passed_features() == 0
    }
}

/// Everything one run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub catalog_version: u32,
    pub result: ProbeResult,
    pub records: Vec<ProbeRecord>,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
}

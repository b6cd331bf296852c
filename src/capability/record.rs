//! Per-implementation capability record and its inputs.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::runner::ProbeResult;

/// Statically known transport kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Pipe,
    Subprocess,
    UnixSocket,
    SharedMemory,
    Http,
    WorkerPool,
}

impl TransportKind {
    pub const ALL: [TransportKind; 6] = [
        TransportKind::Pipe,
        TransportKind::Subprocess,
        TransportKind::UnixSocket,
        TransportKind::SharedMemory,
        TransportKind::Http,
        TransportKind::WorkerPool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Pipe => "pipe",
            TransportKind::Subprocess => "subprocess",
            TransportKind::UnixSocket => "unix_socket",
            TransportKind::SharedMemory => "shared_memory",
            TransportKind::Http => "http",
            TransportKind::WorkerPool => "worker_pool",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown transport key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport '{0}'")]
pub struct UnknownTransport(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTransport(s.to_string()))
    }
}

/// Declared transport support, always keyed by every [`TransportKind`] in
/// declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportCapabilities(IndexMap<String, bool>);

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self(
            TransportKind::ALL
                .into_iter()
                .map(|kind| (kind.as_str().to_string(), false))
                .collect(),
        )
    }
}

impl TransportCapabilities {
    /// Build from the declared subset; undeclared kinds are false.
    pub fn from_declared<I>(declared: I) -> Self
    where
        I: IntoIterator<Item = (TransportKind, bool)>,
    {
        let mut caps = Self::default();
        for (kind, supported) in declared {
            caps.set(kind, supported);
        }
        caps
    }

    pub fn set(&mut self, kind: TransportKind, supported: bool) {
        self.0.insert(kind.as_str().to_string(), supported);
    }

    pub fn supports(&self, kind: TransportKind) -> bool {
        self.0.get(kind.as_str()).copied().unwrap_or(false)
    }

    pub fn supported_count(&self) -> usize {
        self.0.values().filter(|v| **v).count()
    }

    pub fn as_map(&self) -> &IndexMap<String, bool> {
        &self.0
    }
}

/// Identity metadata for one implementation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Extracted version, null when unknown
    pub version: Option<String>,
    pub repo: String,
    pub docs: Option<String>,
    pub package_url: Option<String>,
}

/// Normalized capability record for one implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub version: Option<String>,
    pub repo: String,
    pub docs: Option<String>,
    pub package_url: Option<String>,
    pub transports: TransportCapabilities,
    pub patterns: IndexMap<String, bool>,
    pub features: IndexMap<String, bool>,
}

impl CapabilityRecord {
    /// One-line summary: `<name>: <t> transports, <p> patterns, <f> features`
    pub fn summary_line(&self, name: &str) -> String {
        format!(
            "{}: {} transports, {} patterns, {} features",
            name,
            self.transports.supported_count(),
            self.patterns.values().filter(|v| **v).count(),
            self.features.values().filter(|v| **v).count(),
        )
    }
}

/// Fold identity, declared transports and probed results into one record.
pub fn merge(identity: Identity, transports: TransportCapabilities, result: ProbeResult) -> CapabilityRecord {
    CapabilityRecord {
        version: identity.version,
        repo: identity.repo,
        docs: identity.docs,
        package_url: identity.package_url,
        transports,
        patterns: result.patterns,
        features: result.features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::Catalog;

    fn identity() -> Identity {
        Identity {
            version: Some("1.2.0".into()),
            repo: "https://example.invalid/vgi-rpc-python".into(),
            docs: None,
            package_url: Some("https://pypi.invalid/vgi-rpc".into()),
        }
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("unix_socket".parse::<TransportKind>(), Ok(TransportKind::UnixSocket));
        assert_eq!("carrier_pigeon".parse::<TransportKind>(), Err(UnknownTransport("carrier_pigeon".into())));
        for kind in TransportKind::ALL {
            assert_eq!(kind.to_string().parse::<TransportKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_transports_always_fully_keyed() {
        let caps = TransportCapabilities::from_declared([(TransportKind::Pipe, true)]);
        assert_eq!(caps.as_map().len(), TransportKind::ALL.len());
        assert!(caps.supports(TransportKind::Pipe));
        assert!(!caps.supports(TransportKind::Http));
        assert_eq!(caps.supported_count(), 1);
    }

    #[test]
    fn test_merge_is_total() {
        let catalog = Catalog::standard();
        let record = merge(identity(), TransportCapabilities::default(), ProbeResult::zero(&catalog));
        assert_eq!(record.version.as_deref(), Some("1.2.0"));
        assert_eq!(record.patterns.len(), 6);
        assert_eq!(record.features.len(), 10);
    }

    #[test]
    fn test_record_shape() {
        let catalog = Catalog::standard();
        let mut result = ProbeResult::zero(&catalog);
        result.patterns.insert("unary".into(), true);
        let record = merge(
            Identity { version: None, ..identity() },
            TransportCapabilities::from_declared([(TransportKind::Subprocess, true)]),
            result,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["version"].is_null());
        assert!(value["docs"].is_null());
        assert_eq!(value["transports"]["subprocess"], true);
        assert_eq!(value["transports"]["worker_pool"], false);
        assert_eq!(value["patterns"]["unary"], true);
        assert_eq!(record.summary_line("python"), "python: 1 transports, 1 patterns, 0 features");
    }
}

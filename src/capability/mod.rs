//! Capability Merger
//!
//! Combines statically declared capabilities with a probed result into
//! one always fully keyed record per implementation, and persists the
//! per-pass snapshot of those records.

mod record;
mod snapshot;

pub use record::{merge, CapabilityRecord, Identity, TransportCapabilities, TransportKind, UnknownTransport};
pub use snapshot::{CapabilitySnapshot, SnapshotError};

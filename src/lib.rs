//! RPC Conformance Probe
//!
//! Determines empirically which call patterns and optional features each
//! implementation of an RPC protocol supports, and emits a normalized
//! capability matrix.
//!
//! The layers, bottom up:
//! - [`worker`]: owns one worker subprocess
//! - [`session`]: RPC client over a worker's byte stream
//! - [`battery`]: the fixed, versioned probe catalog
//! - [`runner`]: runs a catalog over a session with fault isolation
//! - [`engine`]: acquire, probe, release for one implementation
//! - [`capability`]: merges static and probed capabilities into records
//! - [`orchestrate`]: walks an inventory and builds the snapshot

pub mod battery;
pub mod capability;
pub mod config;
pub mod engine;
pub mod inventory;
pub mod logging;
pub mod mock;
pub mod orchestrate;
pub mod runner;
pub mod session;
pub mod timeout;
pub mod worker;

pub use battery::{Catalog, ProbeCategory, ProbeDefinition, ProbeFault};
pub use capability::{merge, CapabilityRecord, CapabilitySnapshot, Identity, TransportCapabilities, TransportKind};
pub use config::{EffectiveConfig, ProbeSettings};
pub use engine::{EngineConfig, EngineError, EngineOutcome, ImplementationTarget, ProbeEngine};
pub use inventory::{ImplementationEntry, ImplementationInventory};
pub use orchestrate::Orchestrator;
pub use runner::{ProbeResult, ProbeRunner, ProbeStatus, RunReport};
pub use session::{Session, SessionConfig, Transport};
pub use worker::{LaunchCommand, WorkerHandle};

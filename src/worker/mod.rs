//! Worker Process Handle
//!
//! Owns one worker subprocess for the duration of a probe run. The handle
//! spawns the launch command, exposes its stdio to the session, and
//! guarantees the process is gone once released (or dropped).

mod handle;

pub use handle::{HandleConfig, LaunchCommand, LaunchError, ReleaseOutcome, WorkerHandle};
pub(crate) use handle::{own_process_group, signal_process_group, GroupSignal};

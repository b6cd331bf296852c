//! Probe configuration
//!
//! Settings are merged from three layers, later layers winning:
//! 1. Built-in defaults
//! 2. The `[probe]` table of the inventory file
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, ProbeSettings, PROBE_TABLE};
pub use merge::{deep_merge, merge_layers};

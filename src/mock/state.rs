//! Mock Worker State Management
//!
//! Tracks open exchanges, issued bearer tokens and externalized payload
//! files for the mock worker.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// An exchange opened by a `call` frame and fed by `item` frames.
#[derive(Debug, Clone)]
pub struct OpenExchange {
    /// Method that opened the exchange (failure injection key)
    pub method: String,
    /// Multiplier applied to every item
    pub factor: f64,
}

/// Mutable mock worker state
#[derive(Debug, Default)]
pub struct MockState {
    /// Open exchanges by request ID
    pub exchanges: HashMap<String, OpenExchange>,
    /// Tokens issued by the authentication handshake
    pub tokens: HashSet<String>,
    /// Files written for externalized payloads
    pub external_files: Vec<PathBuf>,
    /// Number of calls handled per method
    pub calls: HashMap<String, u32>,
}

impl MockState {
    /// Create empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handled call
    pub fn record_call(&mut self, method: &str) {
        *self.calls.entry(method.to_string()).or_insert(0) += 1;
    }

    /// Number of calls handled for a method
    pub fn call_count(&self, method: &str) -> u32 {
        self.calls.get(method).copied().unwrap_or(0)
    }
}

impl Drop for MockState {
    fn drop(&mut self) {
        for path in self.external_files.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}

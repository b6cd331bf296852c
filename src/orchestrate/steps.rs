//! Build and version boundaries.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use super::command::{run_command, CommandError};
use crate::inventory::ImplementationEntry;

/// Prepares a checkout so its worker can be launched
pub trait BuildStep {
    /// Build the implementation. `Ok` when there is nothing to build.
    fn build(&self, entry: &ImplementationEntry, checkout: &Path) -> Result<(), CommandError>;
}

/// Reports the version of a checked-out implementation
pub trait VersionSource {
    /// `None` when the version cannot be determined
    fn version(&self, entry: &ImplementationEntry, checkout: &Path) -> Option<String>;
}

/// Runs the entry's `build_cmd`
#[derive(Debug, Clone, Copy)]
pub struct CommandBuild {
    pub timeout: Duration,
}

impl BuildStep for CommandBuild {
    fn build(&self, entry: &ImplementationEntry, checkout: &Path) -> Result<(), CommandError> {
        let Some(argv) = entry.build_cmd.as_deref() else {
            return Ok(());
        };
        let program = argv.first().map(String::as_str).unwrap_or_default();
        run_command(argv, checkout, self.timeout)?.into_success(program)?;
        Ok(())
    }
}

/// Runs the entry's `version_cmd` and extracts the version from stdout
#[derive(Debug, Clone, Copy)]
pub struct CommandVersion {
    pub timeout: Duration,
}

impl VersionSource for CommandVersion {
    fn version(&self, entry: &ImplementationEntry, checkout: &Path) -> Option<String> {
        let argv = entry.version_cmd.as_deref()?;
        let output = match run_command(argv, checkout, self.timeout) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!(status = ?output.status.code(), "Version command failed");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Version command could not run");
                return None;
            }
        };

        let regex = match entry.version_regex() {
            Ok(regex) => regex,
            Err(e) => {
                warn!(error = %e, "Ignoring version pattern");
                None
            }
        };
        extract_version(&output.stdout, regex.as_ref())
    }
}

/// Trimmed output, or the first capture of `pattern` when given
pub fn extract_version(stdout: &str, pattern: Option<&regex_lite::Regex>) -> Option<String> {
    let text = stdout.trim();
    let version = match pattern {
        Some(regex) => regex.captures(text)?.get(1)?.as_str().trim(),
        None => text,
    };
    (!version.is_empty()).then(|| version.to_string())
}

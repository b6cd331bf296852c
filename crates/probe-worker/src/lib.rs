//! Stdio worker for the mock conformance service
//!
//! Reads one request frame per line from stdin and writes the reply frames
//! to stdout. Faults are configured up front from the command line so a
//! subprocess can misbehave in exactly the ways the probes must tolerate.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use conformance_probe::mock::{FailureConfig, MockFeatures, MockWorker, ReplyDelay, GARBLED_LINE};
use tracing::{debug, warn};

/// Invalid worker option
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("unknown feature '{0}' (expected one of: {})", MockFeatures::NAMES.join(", "))]
    UnknownFeature(String),

    #[error("expected METHOD=VALUE, got '{0}'")]
    MissingValue(String),

    #[error("invalid value for {method}: {reason}")]
    InvalidValue { method: String, reason: String },
}

/// Fault to inject for one method
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Fail with the given error kind
    Error { method: String, kind: String },
    /// Never answer
    Hang { method: String },
    /// Answer after a delay
    Delay { method: String, delay: Duration },
    /// Return this value instead of the real result
    WrongResult { method: String, value: serde_json::Value },
    /// Stop a stream after this many items
    Truncate { method: String, items: usize },
    /// Answer with a line that is not a frame
    Garble { method: String },
}

impl Fault {
    fn split(arg: &str) -> Result<(String, String), OptionError> {
        arg.split_once('=')
            .filter(|(method, value)| !method.is_empty() && !value.is_empty())
            .map(|(method, value)| (method.to_string(), value.to_string()))
            .ok_or_else(|| OptionError::MissingValue(arg.to_string()))
    }

    /// Parse `METHOD=KIND`
    pub fn parse_error(arg: &str) -> Result<Self, OptionError> {
        let (method, kind) = Self::split(arg)?;
        Ok(Fault::Error { method, kind })
    }

    /// Parse `METHOD=MILLIS`
    pub fn parse_delay(arg: &str) -> Result<Self, OptionError> {
        let (method, value) = Self::split(arg)?;
        let millis = value.parse::<u64>().map_err(|e| OptionError::InvalidValue {
            method: method.clone(),
            reason: e.to_string(),
        })?;
        Ok(Fault::Delay {
            method,
            delay: Duration::from_millis(millis),
        })
    }

    /// Parse `METHOD=JSON`
    pub fn parse_wrong_result(arg: &str) -> Result<Self, OptionError> {
        let (method, value) = Self::split(arg)?;
        let value = serde_json::from_str(&value).map_err(|e| OptionError::InvalidValue {
            method: method.clone(),
            reason: e.to_string(),
        })?;
        Ok(Fault::WrongResult { method, value })
    }

    /// Parse `METHOD=ITEMS`
    pub fn parse_truncate(arg: &str) -> Result<Self, OptionError> {
        let (method, value) = Self::split(arg)?;
        let items = value.parse::<usize>().map_err(|e| OptionError::InvalidValue {
            method: method.clone(),
            reason: e.to_string(),
        })?;
        Ok(Fault::Truncate { method, items })
    }

    fn apply(&self, worker: &MockWorker) {
        match self {
            Fault::Error { method, kind } => worker.inject_failure(method, FailureConfig::error(kind.clone(), "injected failure")),
            Fault::Hang { method } => worker.inject_failure(method, FailureConfig::hang()),
            Fault::Delay { method, delay } => worker.inject_failure(method, FailureConfig::delay(*delay)),
            Fault::WrongResult { method, value } => {
                worker.inject_failure(method, FailureConfig::wrong_result(value.clone()))
            }
            Fault::Truncate { method, items } => worker.inject_failure(method, FailureConfig::truncate(*items)),
            Fault::Garble { method } => worker.inject_failure(method, FailureConfig::garbled()),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Service name reported in the handshake
    pub service: Option<String>,
    /// Feature names to turn off
    pub disabled: Vec<String>,
    pub faults: Vec<Fault>,
}

impl WorkerOptions {
    /// Build the mock worker these options describe.
    pub fn build(&self) -> Result<MockWorker, OptionError> {
        let mut features = MockFeatures::default();
        for name in &self.disabled {
            if !features.disable(name) {
                return Err(OptionError::UnknownFeature(name.clone()));
            }
        }

        let mut worker = MockWorker::with_features(features);
        if let Some(service) = &self.service {
            worker = worker.with_service(service.clone());
        }
        for fault in &self.faults {
            fault.apply(&worker);
        }
        Ok(worker)
    }
}

/// Serve requests until `input` reaches end of file.
///
/// Returns the number of request lines handled.
pub fn serve<R: BufRead, W: Write>(worker: &MockWorker, input: R, mut output: W) -> io::Result<u64> {
    let mut handled = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        handled += 1;

        let reply = worker.handle_line(&line);
        match reply.delay {
            ReplyDelay::Immediate => {}
            ReplyDelay::After(delay) => thread::sleep(delay),
            ReplyDelay::Never => {
                debug!("Withholding reply");
                continue;
            }
        }

        if reply.garbled {
            writeln!(output, "{}", GARBLED_LINE)?;
        }
        for frame in &reply.frames {
            match probe_protocol::encode_line(frame) {
                Ok(encoded) => writeln!(output, "{}", encoded)?,
                Err(e) => warn!(error = %e, "Dropping unencodable frame"),
            }
        }
        output.flush()?;
    }
    Ok(handled)
}

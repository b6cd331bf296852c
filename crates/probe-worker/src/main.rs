//! Probe Worker Entrypoint
//!
//! Usage: probe-worker [--disable FEATURE]... [--hang METHOD]... [--garble METHOD]... [--fail METHOD=KIND]...
//!
//! Serves the conformance service over stdin/stdout until stdin closes.
//! Logs go to stderr.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use probe_worker::{serve, Fault, WorkerOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "probe-worker")]
#[command(about = "Conformance service worker over stdio", version)]
struct Cli {
    /// Service name to report in the handshake
    #[arg(long)]
    service: Option<String>,

    /// Turn off a feature (repeatable)
    #[arg(long, value_name = "FEATURE")]
    disable: Vec<String>,

    /// Fail METHOD with error KIND
    #[arg(long, value_name = "METHOD=KIND", value_parser = Fault::parse_error)]
    fail: Vec<Fault>,

    /// Never answer METHOD
    #[arg(long, value_name = "METHOD")]
    hang: Vec<String>,

    /// Answer METHOD after MILLIS
    #[arg(long, value_name = "METHOD=MILLIS", value_parser = Fault::parse_delay)]
    delay: Vec<Fault>,

    /// Answer METHOD with a fixed JSON value
    #[arg(long, value_name = "METHOD=JSON", value_parser = Fault::parse_wrong_result)]
    wrong: Vec<Fault>,

    /// Stop METHOD's stream after ITEMS items
    #[arg(long, value_name = "METHOD=ITEMS", value_parser = Fault::parse_truncate)]
    truncate: Vec<Fault>,

    /// Answer METHOD with a line that is not a frame
    #[arg(long, value_name = "METHOD")]
    garble: Vec<String>,
}

impl Cli {
    fn into_options(self) -> WorkerOptions {
        let hangs = self.hang.into_iter().map(|method| Fault::Hang { method });
        let garbles = self.garble.into_iter().map(|method| Fault::Garble { method });
        WorkerOptions {
            service: self.service,
            disabled: self.disable,
            faults: self
                .fail
                .into_iter()
                .chain(hangs)
                .chain(self.delay)
                .chain(self.wrong)
                .chain(self.truncate)
                .chain(garbles)
                .collect(),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    let options = Cli::parse().into_options();
    let worker = match options.build() {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "Invalid worker options");
            return ExitCode::FAILURE;
        }
    };

    info!(faults = options.faults.len(), disabled = options.disabled.len(), "Worker ready");
    match serve(&worker, io::stdin().lock(), io::stdout().lock()) {
        Ok(handled) => {
            info!(requests = handled, "Input closed; exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "I/O error");
            ExitCode::FAILURE
        }
    }
}

//! capprobe CLI
//!
//! Entry point for the `capprobe` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conformance_probe::logging::{self, LogFormat};
use conformance_probe::runner::ProbeStatus;
use conformance_probe::{
    Catalog, EffectiveConfig, ImplementationInventory, ImplementationTarget, LaunchCommand, Orchestrator,
    ProbeCategory, ProbeEngine,
};
use serde_json::{json, Map, Value};
use tracing::info;

#[derive(Parser)]
#[command(name = "capprobe")]
#[command(about = "Cross-implementation RPC conformance prober", version)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Default)]
struct Overrides {
    /// Per-call timeout in milliseconds
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// Battery budget in seconds
    #[arg(long)]
    budget_seconds: Option<u64>,
}

impl Overrides {
    fn to_value(&self) -> Option<Value> {
        let mut map = Map::new();
        if let Some(ms) = self.call_timeout_ms {
            map.insert("call_timeout_ms".into(), json!(ms));
        }
        if let Some(secs) = self.budget_seconds {
            map.insert("battery_budget_seconds".into(), json!(secs));
        }
        (!map.is_empty()).then_some(Value::Object(map))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every implementation in an inventory and write the snapshot
    Run {
        /// Implementation inventory (TOML)
        #[arg(long, short = 'i')]
        inventory: PathBuf,

        /// Directory holding implementation checkouts
        #[arg(long, default_value = "repos")]
        repos_dir: PathBuf,

        /// Snapshot output path
        #[arg(long, short = 'o', default_value = "capabilities.json")]
        output: PathBuf,

        /// Also write per-probe diagnostics here
        #[arg(long)]
        diagnostics: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Probe a single worker command
    Probe {
        /// Name used in logs
        #[arg(long, default_value = "worker")]
        name: String,

        /// Working directory for the worker
        #[arg(long, default_value = ".")]
        cwd: PathBuf,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,

        /// Worker command (after --)
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// List the probe catalog
    Catalog {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate an inventory and its probe settings
    Verify {
        /// Implementation inventory (TOML)
        #[arg(long, short = 'i')]
        inventory: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_format) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    match cli.command {
        Commands::Run {
            inventory,
            repos_dir,
            output,
            diagnostics,
            overrides,
        } => run_pass(&inventory, repos_dir, &output, diagnostics.as_deref(), &overrides),
        Commands::Probe {
            name,
            cwd,
            json,
            overrides,
            cmd,
        } => run_probe(name, cwd, json, &overrides, &cmd),
        Commands::Catalog { json } => run_catalog(json),
        Commands::Verify { inventory } => run_verify(&inventory),
    }
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, error);
    process::exit(1);
}

fn run_pass(
    inventory_path: &Path,
    repos_dir: PathBuf,
    output: &Path,
    diagnostics: Option<&Path>,
    overrides: &Overrides,
) {
    let inventory =
        ImplementationInventory::load(inventory_path).unwrap_or_else(|e| fail("Error loading inventory", e));
    let config = EffectiveConfig::build(Some(inventory_path), overrides.to_value())
        .unwrap_or_else(|e| fail("Configuration error", e));
    let settings = config.settings;

    info!(
        implementations = inventory.len(),
        repos_dir = %repos_dir.display(),
        output = %output.display(),
        "Starting capability pass"
    );

    let engine = ProbeEngine::new(Arc::new(Catalog::standard()), settings.engine_config());
    let pass = Orchestrator::new(engine, repos_dir, &settings).run(&inventory);

    for line in pass.snapshot.summary_lines() {
        println!("{}", line);
    }

    if let Err(e) = pass.snapshot.write_to_file(output) {
        fail("Error writing snapshot", e);
    }
    if let Some(path) = diagnostics {
        if let Err(e) = pass.diagnostics.write_to_file(path) {
            fail("Error writing diagnostics", e);
        }
    }
    info!(path = %output.display(), "Snapshot written");
}

fn run_probe(name: String, cwd: PathBuf, json_output: bool, overrides: &Overrides, cmd: &[String]) {
    let config = EffectiveConfig::build(None, overrides.to_value()).unwrap_or_else(|e| fail("Configuration error", e));
    let Some(launch) = LaunchCommand::from_argv(cmd) else {
        fail("Error", "empty worker command");
    };

    let engine = ProbeEngine::new(Arc::new(Catalog::standard()), config.settings.engine_config());
    let target = ImplementationTarget {
        name,
        launch,
        working_dir: cwd,
    };
    let outcome = engine.probe(&target);

    if json_output {
        match serde_json::to_string_pretty(&outcome.result) {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error serializing output", e),
        }
    } else if let Some(report) = &outcome.report {
        for record in &report.records {
            let status = match &record.status {
                ProbeStatus::Passed => "pass".to_string(),
                ProbeStatus::Failed => "FAIL".to_string(),
                ProbeStatus::Faulted { reason } => format!("FAULT ({})", reason),
                ProbeStatus::TimedOut { reason } => format!("TIMEOUT ({})", reason),
                ProbeStatus::NotAttempted => "skipped".to_string(),
            };
            println!("  {:<8} {:<22} {}", record.category.to_string(), record.id, status);
        }
        println!(
            "{} patterns, {} features",
            outcome.result.passed_patterns(),
            outcome.result.passed_features()
        );
    }

    if let Some(e) = outcome.error {
        fail("Worker could not be probed", e);
    }
}

fn run_catalog(json_output: bool) {
    let catalog = Catalog::standard();

    if json_output {
        let probes: Vec<Value> = catalog
            .probes()
            .iter()
            .map(|p| json!({"id": p.id, "category": p.category, "description": p.description}))
            .collect();
        let output = json!({"version": catalog.version(), "probes": probes});
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error serializing output", e),
        }
        return;
    }

    println!("Probe catalog v{}", catalog.version());
    for category in [ProbeCategory::CallPattern, ProbeCategory::Feature] {
        println!();
        for probe in catalog.probes().iter().filter(|p| p.category == category) {
            println!("  {:<8} {:<22} {}", category.to_string(), probe.id, probe.description);
        }
    }
}

fn run_verify(inventory_path: &Path) {
    let inventory =
        ImplementationInventory::load(inventory_path).unwrap_or_else(|e| fail("Inventory error", e));
    let config = EffectiveConfig::build(Some(inventory_path), None).unwrap_or_else(|e| fail("Configuration error", e));

    println!("Inventory valid: {}", inventory_path.display());
    println!();
    for entry in &inventory.implementations {
        let worker = entry
            .worker_cmd
            .as_ref()
            .map_or_else(|| "-".to_string(), |argv| argv.join(" "));
        println!(
            "  {:<12} transports: {}  worker: {}",
            entry.name,
            entry.transport_capabilities().supported_count(),
            worker
        );
    }
    println!();
    let s = config.settings;
    println!(
        "  call_timeout_ms={} battery_budget_seconds={} release_grace_ms={} readiness_ms={}",
        s.call_timeout_ms, s.battery_budget_seconds, s.release_grace_ms, s.readiness_ms
    );
}

//! End-to-end probing of the real worker binary over stdio.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conformance_probe::battery::Catalog;
use conformance_probe::engine::{EngineConfig, EngineError, ImplementationTarget, ProbeEngine};
use conformance_probe::runner::ProbeStatus;
use conformance_probe::session::SessionConfig;
use conformance_probe::worker::LaunchCommand;

const WORKER: &str = env!("CARGO_BIN_EXE_probe-worker");

fn engine(call_timeout: Duration, budget: Duration) -> ProbeEngine {
    ProbeEngine::new(
        Arc::new(Catalog::standard()),
        EngineConfig {
            session: SessionConfig { call_timeout },
            battery_budget: budget,
            ..Default::default()
        },
    )
}

fn target(args: &[&str]) -> ImplementationTarget {
    ImplementationTarget {
        name: "probe-worker".into(),
        launch: LaunchCommand::new(WORKER, args.iter().map(|a| a.to_string()).collect()),
        working_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
    }
}

#[test]
fn test_well_behaved_worker_passes_everything() {
    let outcome = engine(Duration::from_secs(5), Duration::from_secs(60)).probe(&target(&[]));

    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(outcome.result.patterns.values().all(|v| *v), "{:?}", outcome.result.patterns);
    assert!(outcome.result.features.values().all(|v| *v), "{:?}", outcome.result.features);
}

#[test]
fn test_probing_twice_is_idempotent() {
    let engine = engine(Duration::from_secs(5), Duration::from_secs(60));
    let first = engine.probe(&target(&["--disable", "exchange"]));
    let second = engine.probe(&target(&["--disable", "exchange"]));
    assert_eq!(first.result, second.result);
    assert!(!first.result.patterns["exchange"]);
    assert!(first.result.patterns["unary"]);
}

#[test]
fn test_injected_faults_are_isolated() {
    let args = [
        "--hang",
        "add",
        "--truncate",
        "count_stream=2",
        "--wrong",
        "echo_optional=\"x\"",
        "--fail",
        "raise_error=ValueError",
    ];
    let outcome = engine(Duration::from_millis(300), Duration::from_secs(60)).probe(&target(&args));
    let result = &outcome.result;

    assert!(outcome.error.is_none());
    assert!(!result.patterns["unary"]);
    assert!(!result.patterns["producer"]);
    assert!(!result.features["optional_types"]);
    assert!(!result.features["error_propagation"]);

    assert!(result.patterns["unary_void"]);
    assert!(result.patterns["producer_with_header"]);
    assert!(result.patterns["exchange"]);
    assert!(result.features["introspection"]);
    assert!(result.features["complex_types"]);
    assert!(result.features["authentication"]);

    let report = outcome.report.unwrap();
    let unary = report.records.iter().find(|r| r.id == "unary").unwrap();
    assert!(matches!(unary.status, ProbeStatus::TimedOut { .. }));
}

#[test]
fn test_budget_exhaustion_force_terminates() {
    let started = Instant::now();
    let outcome =
        engine(Duration::from_secs(30), Duration::from_secs(1)).probe(&target(&["--hang", "count_stream"]));

    let report = outcome.report.expect("battery should have run");
    assert!(report.budget_exhausted);
    assert!(outcome.result.patterns["unary"]);
    assert!(!outcome.result.patterns["producer"]);
    assert_eq!(outcome.result.patterns.len(), 6);
    assert_eq!(outcome.result.features.len(), 10);
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[test]
fn test_undecodable_line_fails_only_that_method() {
    let outcome = engine(Duration::from_secs(5), Duration::from_secs(60)).probe(&target(&["--garble", "echo_list"]));

    assert!(outcome.error.is_none());
    assert!(!outcome.result.features["complex_types"]);
    assert!(outcome.result.features["optional_types"]);
    assert!(outcome.result.features["opentelemetry"]);
    assert!(outcome.result.patterns.values().all(|v| *v));
}

/// Wait until `pid` has exited (a zombie counts as exited).
#[cfg(target_os = "linux")]
fn wait_gone(pid: u32, limit: Duration) -> bool {
    let started = Instant::now();
    loop {
        let gone = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .map_or(false, |(_, rest)| rest.trim_start().starts_with('Z')),
        };
        if gone {
            return true;
        }
        if started.elapsed() >= limit {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Launch the worker behind `sh`, the way `uv run` or `go run` wrap the real
/// worker, recording the worker's PID in `pidfile`.
#[cfg(target_os = "linux")]
fn behind_launcher(pidfile: &std::path::Path, worker_args: &str) -> ImplementationTarget {
    let script = format!(
        "exec 3<&0; \"$0\" {} <&3 3<&- & echo $! > \"$1\"; wait",
        worker_args
    );
    ImplementationTarget {
        name: "launched".into(),
        launch: LaunchCommand::new(
            "sh",
            vec![
                "-c".into(),
                script,
                WORKER.into(),
                pidfile.display().to_string(),
            ],
        ),
        working_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
    }
}

#[cfg(target_os = "linux")]
fn read_pid(pidfile: &std::path::Path) -> u32 {
    std::fs::read_to_string(pidfile).unwrap().trim().parse().unwrap()
}

#[cfg(target_os = "linux")]
#[test]
fn test_worker_behind_launcher_is_probed_and_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");

    let outcome = engine(Duration::from_secs(5), Duration::from_secs(60)).probe(&behind_launcher(&pidfile, ""));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(outcome.result.patterns["unary"]);

    let worker = read_pid(&pidfile);
    assert!(wait_gone(worker, Duration::from_secs(2)), "worker {} still running", worker);
}

#[cfg(target_os = "linux")]
#[test]
fn test_hung_worker_behind_launcher_is_killed_on_budget_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");
    let budget = Duration::from_secs(1);

    let started = Instant::now();
    let outcome = engine(Duration::from_secs(30), budget).probe(&behind_launcher(&pidfile, "--hang count_stream"));
    let elapsed = started.elapsed();

    assert!(outcome.report.unwrap().budget_exhausted);
    let worker = read_pid(&pidfile);
    assert!(wait_gone(worker, Duration::from_secs(2)), "worker {} survived force termination", worker);
    // no goodbye round trip and no release grace period after the budget
    assert!(elapsed < budget + Duration::from_secs(1), "took {:?}", elapsed);
}

#[test]
fn test_wrong_service_is_connect_error() {
    let outcome = engine(Duration::from_secs(5), Duration::from_secs(10)).probe(&target(&["--service", "Other"]));
    assert!(matches!(outcome.error, Some(EngineError::Connect(_))));
    assert!(outcome.result.is_zero());
}

#[test]
fn test_invalid_options_exit_before_handshake() {
    let outcome = engine(Duration::from_secs(2), Duration::from_secs(10)).probe(&target(&["--disable", "teleport"]));
    assert!(outcome.error.is_some());
    assert!(outcome.result.is_zero());
    assert_eq!(outcome.result.patterns.len(), 6);
}

//! Local backend integration tests.
//!
//! These run real subprocesses with `runtime = "none"`, using shell
//! scripts that imitate the fuzzing engine's output.

use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use fuzzsmith_core::application::metrics::MetricsExtractor;
use fuzzsmith_core::config::{LocalConfig, MetricsConfig};
use fuzzsmith_core::domain::{
    BackendKind, Dispatch, FuzzBackend, FuzzJob, GeneratedTarget, TargetSpec,
};
use fuzzsmith_sandbox::LocalSandbox;

fn spec() -> TargetSpec {
    TargetSpec {
        project: "demo".into(),
        function_signature: "parse(const uint8_t*, size_t)".into(),
        language: "c".into(),
        context: None,
    }
}

fn job() -> FuzzJob {
    let mut job = FuzzJob::new(spec(), BackendKind::Local);
    job.cycle = 1;
    job
}

fn sandbox(state_dir: &TempDir, wall_clock_secs: u64) -> LocalSandbox {
    let config = LocalConfig {
        runtime: "none".into(),
        wall_clock_secs,
        build_timeout_secs: 20,
        ..LocalConfig::default()
    };
    LocalSandbox::new(
        config,
        state_dir.path().to_path_buf(),
        MetricsExtractor::new(&MetricsConfig::default().crash_exclusions),
    )
}

fn target(fuzzer_body: &str) -> GeneratedTarget {
    GeneratedTarget {
        source_filename: "target.c".into(),
        source: "/* generated harness */".into(),
        build_script: format!(
            "#!/bin/sh\ncat > fuzz_target <<'EOF'\n#!/bin/sh\n{fuzzer_body}\nEOF\nchmod +x fuzz_target\necho build ok\n"
        ),
    }
}

#[tokio::test]
async fn successful_cycle_extracts_metrics_from_streamed_output() {
    let dir = TempDir::new().unwrap();
    let body = "echo 'INFO: Loaded 1 modules   (100 inline 8-bit counters): 100'\n\
echo '#2  INITED cov: 10 ft: 10 corp: 1/1b'\n\
echo '#200 NEW    cov: 55 ft: 90 corp: 7/30b'";
    let dispatch = sandbox(&dir, 10)
        .dispatch(&job(), &target(body), &CancellationToken::new())
        .await
        .unwrap();

    let Dispatch::Completed(outcome) = dispatch else {
        panic!("local backend must complete synchronously");
    };
    assert!(outcome.build.success);
    let run = outcome.run.expect("build succeeded, so a run must exist");
    assert!(!run.crashed);
    assert_eq!(run.covered_edges, 55);
    assert_eq!(run.total_edges, 100);
    assert!((run.coverage_percent() - 0.55).abs() < 1e-9);

    // The run log is durable and holds the streamed output.
    let log = std::fs::read_to_string(run.run_log_ref.unwrap()).unwrap();
    assert!(log.contains("cov: 55"));
}

#[tokio::test]
async fn failed_build_returns_no_run_result() {
    let dir = TempDir::new().unwrap();
    let bad_target = GeneratedTarget {
        source_filename: "target.c".into(),
        source: String::new(),
        build_script: "#!/bin/sh\necho 'target.c:3: error: unknown type'\nexit 3\n".into(),
    };
    let dispatch = sandbox(&dir, 10)
        .dispatch(&job(), &bad_target, &CancellationToken::new())
        .await
        .unwrap();

    let Dispatch::Completed(outcome) = dispatch else {
        panic!("local backend must complete synchronously");
    };
    assert!(!outcome.build.success);
    assert!(outcome.run.is_none());
    assert!(outcome.build.error.unwrap().contains("unknown type"));
}

#[tokio::test]
async fn crashing_run_is_an_outcome_not_an_error() {
    let dir = TempDir::new().unwrap();
    let body = "echo 'INFO: Loaded 1 modules   (100 inline 8-bit counters): 100'\n\
echo '#50 NEW    cov: 20 ft: 25 corp: 3/9b'\n\
echo '==7==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x6020'\n\
echo 'SUMMARY: AddressSanitizer: heap-buffer-overflow in parse'\n\
printf x > crash-deadbeef\nexit 1"; // engine exits non-zero on a crash
    let dispatch = sandbox(&dir, 10)
        .dispatch(&job(), &target(body), &CancellationToken::new())
        .await
        .unwrap();

    let Dispatch::Completed(outcome) = dispatch else {
        panic!("local backend must complete synchronously");
    };
    let run = outcome.run.expect("crash still produces a run result");
    assert!(run.crashed);
    assert_eq!(run.crash_category.as_deref(), Some("heap-buffer-overflow"));
    assert!(run.reproducer_ref.unwrap().contains("crash-"));
    assert_eq!(run.covered_edges, 20);
}

#[tokio::test]
async fn wall_clock_timeout_yields_partial_coverage_without_crash() {
    let dir = TempDir::new().unwrap();
    let body = "echo 'INFO: Loaded 1 modules   (100 inline 8-bit counters): 100'\n\
echo '#10 NEW    cov: 12 ft: 12 corp: 2/4b'\nsleep 60";
    // 1 second wall clock; grace keeps the whole test bounded.
    let config = LocalConfig {
        runtime: "none".into(),
        wall_clock_secs: 1,
        build_timeout_secs: 20,
        ..LocalConfig::default()
    };
    let sandbox = LocalSandbox::new(
        config,
        dir.path().to_path_buf(),
        MetricsExtractor::new(&MetricsConfig::default().crash_exclusions),
    );

    let started = std::time::Instant::now();
    let dispatch = sandbox
        .dispatch(&job(), &target(body), &CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(40));

    let Dispatch::Completed(outcome) = dispatch else {
        panic!("local backend must complete synchronously");
    };
    let run = outcome.run.expect("timeout still produces a run result");
    assert!(!run.crashed);
    assert_eq!(run.covered_edges, 12);
}

#[tokio::test]
async fn cancellation_kills_the_subprocess() {
    let dir = TempDir::new().unwrap();
    let body = "echo started\nsleep 60";
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let result = sandbox(&dir, 30)
        .dispatch(&job(), &target(body), &cancel)
        .await;
    assert!(matches!(
        result,
        Err(fuzzsmith_core::domain::BackendError::Cancelled(_))
    ));
}

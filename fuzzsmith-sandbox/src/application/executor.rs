//! Local build+fuzz execution.
//!
//! One cycle runs in a per-cycle work dir under the state dir:
//!
//! 1. Generated source and build script are materialised.
//! 2. The build script runs; a non-zero exit ends the cycle with a failed
//!    build and no run.
//! 3. The fuzzer runs with the configured caps. Stdout and stderr are
//!    streamed line-by-line to `run.log` while also accumulating for
//!    metrics extraction, so a hang or crash keeps everything captured so
//!    far on disk.
//! 4. The accumulated output goes through the metrics extractor and the
//!    cycle outcome is assembled.
//!
//! A run that exceeds the wall clock or per-input timeout is terminated
//! and reported as a no-crash partial-coverage result, not as a fault.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fuzzsmith_core::application::metrics::MetricsExtractor;
use fuzzsmith_core::config::LocalConfig;
use fuzzsmith_core::domain::{
    BackendError, BuildResult, CycleOutcome, Dispatch, FuzzBackend, FuzzJob, GeneratedTarget,
    RunResult,
};
use fuzzsmith_core::paths;

use crate::domain::limits::ResourceLimits;
use crate::infrastructure::command::{
    self, CommandPlan, BUILD_LOG, BUILD_SCRIPT, CORPUS_DIR, RUN_LOG, TARGET_BINARY,
};

/// Grace period past the engine's own wall clock before we kill the run.
const WALL_CLOCK_GRACE: Duration = Duration::from_secs(15);

/// Sandboxed local backend. Blocks its caller for the full cycle.
pub struct LocalSandbox {
    config: LocalConfig,
    state_dir: PathBuf,
    metrics: MetricsExtractor,
}

impl LocalSandbox {
    pub fn new(config: LocalConfig, state_dir: PathBuf, metrics: MetricsExtractor) -> Self {
        Self {
            config,
            state_dir,
            metrics,
        }
    }

    async fn materialize(
        &self,
        work_dir: &Path,
        target: &GeneratedTarget,
    ) -> Result<(), BackendError> {
        if target.source_filename.contains('/') || target.source_filename.contains("..") {
            return Err(BackendError::Launch(format!(
                "refusing source filename outside the work dir: {}",
                target.source_filename
            )));
        }
        tokio::fs::create_dir_all(work_dir.join(CORPUS_DIR)).await?;
        tokio::fs::write(work_dir.join(&target.source_filename), &target.source).await?;
        let script_path = work_dir.join(BUILD_SCRIPT);
        tokio::fs::write(&script_path, &target.build_script).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
                .await?;
        }
        Ok(())
    }

    /// Locate the reproducer input the engine wrote next to the binary,
    /// if the run crashed.
    async fn find_reproducer(&self, work_dir: &Path) -> Option<PathBuf> {
        let mut entries = tokio::fs::read_dir(work_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("crash-") {
                return Some(entry.path());
            }
        }
        None
    }
}

#[async_trait]
impl FuzzBackend for LocalSandbox {
    async fn dispatch(
        &self,
        job: &FuzzJob,
        target: &GeneratedTarget,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, BackendError> {
        let work_dir = paths::cycle_dir(&self.state_dir, job.id, job.cycle);
        self.materialize(&work_dir, target).await?;
        let limits = ResourceLimits::from_config(&self.config);

        // Build step
        let build_log = work_dir.join(BUILD_LOG);
        let plan = command::build_plan(&self.config, &work_dir);
        debug!(job_id = %job.id, cycle = job.cycle, command = %plan.describe(), "starting build");
        let build = run_streamed(plan, &build_log, limits.build_timeout, cancel).await?;

        if !build.succeeded() {
            let reason = if build.timed_out {
                format!("build timed out after {:?}", limits.build_timeout)
            } else {
                format!("build failed: {}", tail(&build.output, 6))
            };
            warn!(job_id = %job.id, cycle = job.cycle, "{reason}");
            return Ok(Dispatch::Completed(CycleOutcome {
                build: BuildResult::failed(reason, Some(build_log.display().to_string())),
                run: None,
            }));
        }

        let build_result = BuildResult::succeeded(
            Some(build_log.display().to_string()),
            Some(work_dir.join(TARGET_BINARY).display().to_string()),
        );

        // Fuzz step
        let run_log = work_dir.join(RUN_LOG);
        let plan = command::fuzz_plan(&self.config, &limits, &work_dir);
        info!(
            job_id = %job.id,
            cycle = job.cycle,
            engine = %self.config.engine,
            sanitizer = %self.config.sanitizer,
            "starting fuzzing run"
        );
        let run = run_streamed(
            plan,
            &run_log,
            limits.wall_clock + WALL_CLOCK_GRACE,
            cancel,
        )
        .await?;
        if run.timed_out {
            debug!(job_id = %job.id, cycle = job.cycle, "run hit the wall clock timeout");
        }

        let metrics = self.metrics.extract(&run.output);
        let reproducer = if metrics.crashed {
            self.find_reproducer(&work_dir).await
        } else {
            None
        };
        let coverage_report = work_dir.join("coverage.json");
        let coverage_report_ref = tokio::fs::try_exists(&coverage_report)
            .await
            .unwrap_or(false)
            .then(|| coverage_report.display().to_string());

        Ok(Dispatch::Completed(CycleOutcome {
            build: build_result.clone(),
            run: Some(RunResult {
                build: build_result,
                crashed: metrics.crashed,
                crash_category: metrics.crash_category,
                reproducer_ref: reproducer.map(|p| p.display().to_string()),
                covered_edges: metrics.covered_edges,
                total_edges: metrics.total_edges,
                run_log_ref: Some(run_log.display().to_string()),
                corpus_ref: Some(work_dir.join(CORPUS_DIR).display().to_string()),
                coverage_report_ref,
            }),
        }))
    }
}

struct StreamedRun {
    /// `None` when the process was killed at the timeout.
    status: Option<std::process::ExitStatus>,
    output: String,
    timed_out: bool,
}

impl StreamedRun {
    fn succeeded(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Spawn the plan and stream its output to `log_path` while accumulating
/// it in memory. Returns when the process exits, the timeout fires, or the
/// token is cancelled (the subprocess is killed in the latter two cases).
async fn run_streamed(
    plan: CommandPlan,
    log_path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<StreamedRun, BackendError> {
    let described = plan.describe();
    let mut log_file = tokio::fs::File::create(log_path).await?;
    let mut child = plan
        .into_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| BackendError::Launch(format!("failed to spawn `{described}`: {err}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BackendError::Launch("child stdout was not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BackendError::Launch("child stderr was not captured".into()))?;
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    let mut output = String::new();
    let mut out_done = false;
    let mut err_done = false;
    let mut timed_out = false;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while !(out_done && err_done) {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = log_file.flush().await;
                return Err(BackendError::Cancelled(
                    "subprocess terminated by cancellation".into(),
                ));
            }
            _ = &mut deadline => {
                timed_out = true;
                let _ = child.start_kill();
                break;
            }
            line = out_lines.next_line(), if !out_done => {
                match line {
                    Ok(Some(line)) => append_line(&mut log_file, &mut output, &line).await?,
                    _ => out_done = true,
                }
            }
            line = err_lines.next_line(), if !err_done => {
                match line {
                    Ok(Some(line)) => append_line(&mut log_file, &mut output, &line).await?,
                    _ => err_done = true,
                }
            }
        }
    }
    log_file.flush().await?;

    let status = if timed_out {
        // Reap the killed child; its exit status is meaningless here.
        let _ = child.wait().await;
        None
    } else {
        Some(child.wait().await?)
    };

    Ok(StreamedRun {
        status,
        output,
        timed_out,
    })
}

async fn append_line(
    log_file: &mut tokio::fs::File,
    buffer: &mut String,
    line: &str,
) -> Result<(), BackendError> {
    log_file.write_all(line.as_bytes()).await?;
    log_file.write_all(b"\n").await?;
    buffer.push_str(line);
    buffer.push('\n');
    Ok(())
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join(" | ")
}

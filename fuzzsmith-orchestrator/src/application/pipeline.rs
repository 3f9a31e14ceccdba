//! Per-job pipeline: the state machine that drives one job through its
//! cycles.
//!
//! ```text
//! Worker              JobPipeline           Backend          StatusStore
//!   │                     │                    │                  │
//!   ├─ run(job) ─────────►│                    │                  │
//!   │                     ├─ writing ──────────┼─ update(0.3) ───►│
//!   │                     ├─ executing ───────►│                  │
//!   │                     │◄─ CycleOutcome ────┤─ update(0.7) ───►│
//!   │                     ├─ analyzing ────────┼─ update(0.9) ───►│
//!   │                     ├─ termination check │                  │
//!   │                     ├─ (next cycle…)     │                  │
//!   │◄── FuzzJob(final) ──┤────────────────────┼─ update(1.0) ───►│
//! ```
//!
//! Stages execute strictly in sequence within a job: no stage begins
//! before the prior stage's result is appended to the history. Every
//! status transition is persisted before the next stage runs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fuzzsmith_core::config::PipelineConfig;
use fuzzsmith_core::domain::{
    AnalysisResult, BackendError, BackendKind, BuildResult, Dispatch, FuzzBackend, FuzzJob,
    GeneratedTarget, GenerationError, JobState, JobTransitionError, Stage, StageResult,
    TargetGenerator,
};
use fuzzsmith_core::paths;

use crate::application::analysis;
use crate::infrastructure::remote::RemoteTracker;
use crate::infrastructure::status_store::{StatusStore, StatusStoreError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("job cancelled: {0}")]
    Cancelled(String),
    #[error("status store failure: {0}")]
    Store(#[from] StatusStoreError),
    #[error(transparent)]
    Transition(#[from] JobTransitionError),
    #[error("backend fault: {0}")]
    Backend(BackendError),
    #[error("no backend configured for {0:?} execution")]
    BackendUnavailable(BackendKind),
    #[error("state dir i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled(reason) => Self::Cancelled(reason),
            other => Self::Backend(other),
        }
    }
}

/// Drives jobs through their cycles. One instance is shared by all
/// workers; all per-job state lives on the job itself.
pub struct JobPipeline {
    generator: Arc<dyn TargetGenerator>,
    local: Arc<dyn FuzzBackend>,
    remote: Option<Arc<dyn FuzzBackend>>,
    tracker: Option<Arc<RemoteTracker>>,
    store: Arc<dyn StatusStore>,
    config: PipelineConfig,
}

impl JobPipeline {
    pub fn new(
        generator: Arc<dyn TargetGenerator>,
        local: Arc<dyn FuzzBackend>,
        remote: Option<Arc<dyn FuzzBackend>>,
        tracker: Option<Arc<RemoteTracker>>,
        store: Arc<dyn StatusStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            local,
            remote,
            tracker,
            store,
            config,
        }
    }

    /// Run a job to a terminal state. Never panics the worker: every
    /// fault path lands in `state = failed` with diagnostics attached.
    pub async fn run(&self, mut job: FuzzJob, cancel: CancellationToken) -> FuzzJob {
        let job_id = job.id;
        match self.drive(&mut job, &cancel).await {
            Ok(()) => {
                info!(job_id = %job_id, cycles = job.cycle, "job completed");
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(job_id = %job_id, error = %reason, "job failed");
                self.abandon_remote(&job).await;
                job.error = Some(reason.clone());
                if let Err(transition_err) = job.transition(JobState::Failed, Some(reason.clone())) {
                    debug!(job_id = %job_id, error = %transition_err, "job already terminal");
                }
                // Status and history still get persisted on the failure
                // path so readResults works for failed jobs too.
                if let Err(store_err) = self
                    .store
                    .update(
                        job_id,
                        job.stage,
                        job.stage.progress_hint(),
                        &reason,
                        JobState::Failed,
                    )
                    .await
                {
                    warn!(job_id = %job_id, error = %store_err, "failed to persist failure status");
                }
                if let Err(store_err) = self.store.save_results(job_id, &job.history).await {
                    warn!(job_id = %job_id, error = %store_err, "failed to persist failure history");
                }
            }
        }
        job
    }

    async fn drive(
        &self,
        job: &mut FuzzJob,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let backend = self.backend_for(job)?;

        job.transition(JobState::Running, Some("worker started execution".into()))?;
        job.stage = Stage::Starting;
        self.publish(job, "job accepted").await?;

        loop {
            self.ensure_live(cancel)?;
            job.cycle += 1;
            let cycle = job.cycle;

            // ── Writing ──────────────────────────────────────────────
            job.stage = Stage::Writing;
            let prior = job.latest_analysis().cloned();
            let generated = match self
                .generator
                .generate(&job.spec, prior.as_ref())
                .await
                .and_then(validate_target)
            {
                Ok(target) => {
                    self.persist_target(job, &target).await?;
                    self.publish(job, &format!("cycle {cycle}: target generated"))
                        .await?;
                    Some(target)
                }
                // An opaque generator failure fails this cycle, not the
                // job: record it and fall through to the termination
                // check without executing anything.
                Err(err) => {
                    warn!(job_id = %job.id, cycle, error = %err, "target generation failed");
                    job.record(StageResult::Analysis(AnalysisResult {
                        success: false,
                        cycle,
                        recommendations: vec![format!("target generation failed: {err}")],
                        crashed: false,
                        covered_edges: 0,
                        total_edges: 0,
                        run_log_ref: None,
                    }));
                    None
                }
            };

            if let Some(target) = generated {
                self.ensure_live(cancel)?;

                // ── Executing ────────────────────────────────────────
                job.stage = Stage::Executing;
                let outcome = match backend
                    .dispatch(job, &target, cancel)
                    .await
                    .map_err(PipelineError::from_backend)?
                {
                    Dispatch::Completed(outcome) => outcome,
                    Dispatch::Pending(handle) => {
                        job.remote = Some(handle.clone());
                        self.publish(job, &format!("cycle {cycle}: remote build pending"))
                            .await?;
                        let tracker = self
                            .tracker
                            .as_ref()
                            .ok_or(PipelineError::BackendUnavailable(BackendKind::Remote))?;
                        tracker
                            .await_terminal(handle.clone(), cancel)
                            .await
                            .map_err(PipelineError::from_backend)?;
                        let outcome = backend
                            .collect(&handle)
                            .await
                            .map_err(PipelineError::from_backend)?;
                        job.remote = None;
                        outcome
                    }
                };

                match outcome.run {
                    None => {
                        // Build failure ends the cycle early; it still
                        // counts against the cycle budget.
                        warn!(job_id = %job.id, cycle, "build failed; skipping analysis this cycle");
                        job.record(StageResult::Build(outcome.build));
                        self.publish(job, &format!("cycle {cycle}: build failed"))
                            .await?;
                    }
                    Some(run) => {
                        self.publish(
                            job,
                            &format!(
                                "cycle {cycle}: run finished, {}/{} edges covered{}",
                                run.covered_edges,
                                run.total_edges,
                                if run.crashed { ", crash found" } else { "" }
                            ),
                        )
                        .await?;
                        job.record(StageResult::Run(run.clone()));

                        self.ensure_live(cancel)?;

                        // ── Analyzing ────────────────────────────────
                        job.stage = Stage::Analyzing;
                        let analysis = analysis::evaluate(&run, cycle, &self.config);
                        let message = if analysis.success {
                            format!("cycle {cycle}: stopping bar met")
                        } else {
                            format!(
                                "cycle {cycle}: stopping bar not met ({} recommendation(s))",
                                analysis.recommendations.len()
                            )
                        };
                        job.record(StageResult::Analysis(analysis));
                        self.publish(job, &message).await?;
                    }
                }
            }

            // ── Termination check ────────────────────────────────────
            let latest = job.latest_analysis();
            let succeeded = latest.map(|a| a.success).unwrap_or(false);
            let crashed = latest.map(|a| a.crashed).unwrap_or(false);
            if succeeded {
                debug!(job_id = %job.id, cycle, "stopping bar met");
                break;
            }
            if self.config.stop_on_crash && crashed {
                debug!(job_id = %job.id, cycle, "stopping on first crash");
                break;
            }
            if job.cycle >= self.config.max_cycles {
                debug!(job_id = %job.id, cycle, "cycle budget exhausted");
                break;
            }
        }

        // Exhausting cycles is a normal terminal outcome, not a failure.
        job.stage = Stage::Done;
        let summary = summarize(job);
        job.transition(JobState::Completed, Some(summary.clone()))?;
        self.store
            .update(job.id, Stage::Done, 1.0, &summary, JobState::Completed)
            .await?;
        self.store.save_results(job.id, &job.history).await?;
        Ok(())
    }

    /// Persist generated sources under the cycle dir so they can be read
    /// back as job artifacts later, and append the writing stage's
    /// build-shaped placeholder entry.
    async fn persist_target(
        &self,
        job: &mut FuzzJob,
        target: &GeneratedTarget,
    ) -> Result<(), PipelineError> {
        let dir = paths::cycle_dir(&self.config.state_dir, job.id, job.cycle);
        tokio::fs::create_dir_all(&dir).await?;
        let source_path = dir.join(&target.source_filename);
        tokio::fs::write(&source_path, &target.source).await?;
        tokio::fs::write(dir.join("build.sh"), &target.build_script).await?;

        job.record(StageResult::Build(BuildResult::succeeded(
            None,
            Some(source_path.display().to_string()),
        )));
        Ok(())
    }

    fn backend_for(&self, job: &FuzzJob) -> Result<Arc<dyn FuzzBackend>, PipelineError> {
        match job.backend {
            BackendKind::Local => Ok(self.local.clone()),
            BackendKind::Remote => self
                .remote
                .clone()
                .ok_or(PipelineError::BackendUnavailable(BackendKind::Remote)),
        }
    }

    fn ensure_live(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            Err(PipelineError::Cancelled("cancelled between stages".into()))
        } else {
            Ok(())
        }
    }

    async fn publish(&self, job: &FuzzJob, message: &str) -> Result<(), PipelineError> {
        self.store
            .update(
                job.id,
                job.stage,
                job.stage.progress_hint(),
                message,
                job.state,
            )
            .await?;
        Ok(())
    }

    /// Best-effort remote cancel for a cycle still in flight when the job
    /// dies. The remote build may finish anyway; its results are simply
    /// never collected.
    async fn abandon_remote(&self, job: &FuzzJob) {
        let Some(handle) = &job.remote else {
            return;
        };
        let Ok(backend) = self.backend_for(job) else {
            return;
        };
        if let Err(err) = backend.cancel(handle).await {
            debug!(job_id = %job.id, remote_id = %handle.remote_id, error = %err,
                "best-effort remote cancel failed");
        }
    }
}

fn summarize(job: &FuzzJob) -> String {
    match job.best_cycle() {
        Some(best) => format!(
            "completed after {} cycle(s); best cycle {} reached {:.1}% coverage without crashing",
            job.cycle,
            best.cycle,
            best.coverage_percent() * 100.0
        ),
        None => {
            let crashes = job
                .history
                .iter()
                .filter(|r| matches!(r, StageResult::Analysis(a) if a.crashed))
                .count();
            if crashes > 0 {
                format!(
                    "completed after {} cycle(s); every measured run crashed ({crashes} crashing cycle(s))",
                    job.cycle
                )
            } else {
                format!(
                    "completed after {} cycle(s); no run produced usable coverage",
                    job.cycle
                )
            }
        }
    }
}

fn validate_target(target: GeneratedTarget) -> Result<GeneratedTarget, GenerationError> {
    if target.source_filename.is_empty()
        || target.source_filename.contains('/')
        || target.source_filename.contains("..")
    {
        return Err(GenerationError::InvalidOutput(format!(
            "unsafe source filename: {:?}",
            target.source_filename
        )));
    }
    if target.build_script.trim().is_empty() {
        return Err(GenerationError::InvalidOutput(
            "empty build script".into(),
        ));
    }
    Ok(target)
}

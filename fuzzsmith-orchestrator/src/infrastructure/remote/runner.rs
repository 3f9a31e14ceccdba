//! Remote execution backend.
//!
//! `dispatch` uploads the generated sources, submits the build through the
//! retry controller and returns a pending handle without waiting for the
//! build. `poll` maps the service status; `collect` pulls whatever
//! artifacts exist, runs the log through the metrics extractor and
//! assembles an outcome shaped exactly like the local backend's.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fuzzsmith_core::application::metrics::MetricsExtractor;
use fuzzsmith_core::config::RemoteConfig;
use fuzzsmith_core::domain::{
    BackendError, BuildResult, CycleOutcome, Dispatch, FuzzBackend, FuzzJob, GeneratedTarget,
    PollStatus, RemoteHandle, RunResult,
};
use fuzzsmith_core::infrastructure::retry::{with_retry, RetryTable};

use super::client::{RemoteBuildClient, RemoteBuildRequest, RemoteBuildStatus};
use super::storage::ArtifactStore;

pub struct RemoteBackend {
    client: Arc<dyn RemoteBuildClient>,
    artifacts: Arc<dyn ArtifactStore>,
    metrics: MetricsExtractor,
    config: RemoteConfig,
    retry: RetryTable,
    max_attempts: u32,
}

impl RemoteBackend {
    pub fn new(
        client: Arc<dyn RemoteBuildClient>,
        artifacts: Arc<dyn ArtifactStore>,
        metrics: MetricsExtractor,
        config: RemoteConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            artifacts,
            metrics,
            config,
            retry: RetryTable::standard(),
            max_attempts,
        }
    }

    fn request(job: &FuzzJob, handle: &RemoteHandle, target: &GeneratedTarget) -> RemoteBuildRequest {
        RemoteBuildRequest {
            target_id: format!("{}-cycle-{:03}", job.id, job.cycle),
            project: job.spec.project.clone(),
            experiment: handle.experiment.clone(),
            target_filename: target.source_filename.clone(),
            source_location: handle.source_key.clone(),
            build_script_location: handle.build_script_key.clone(),
            log_location: handle.log_key.clone(),
            corpus_location: handle.corpus_key.clone(),
            coverage_location: handle.coverage_key.clone(),
            reproducer_location: handle.reproducer_key.clone(),
        }
    }
}

#[async_trait]
impl FuzzBackend for RemoteBackend {
    async fn dispatch(
        &self,
        job: &FuzzJob,
        target: &GeneratedTarget,
        _cancel: &CancellationToken,
    ) -> Result<Dispatch, BackendError> {
        let mut handle = RemoteHandle::allocate(&self.config.experiment, job.id, job.cycle);

        // The builder fetches sources from storage, not from the request.
        self.artifacts
            .put(&handle.source_key, target.source.clone().into_bytes())
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?;
        self.artifacts
            .put(
                &handle.build_script_key,
                target.build_script.clone().into_bytes(),
            )
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?;

        let request = Self::request(job, &handle, target);
        match with_retry(|| self.client.submit(&request), &self.retry, self.max_attempts).await {
            Ok(remote_id) => {
                info!(job_id = %job.id, cycle = job.cycle, remote_id, "remote build submitted");
                handle.remote_id = remote_id;
                Ok(Dispatch::Pending(handle))
            }
            // Submission that stays down after retries is a failed build
            // for this cycle, not a job fault.
            Err(err) => {
                warn!(job_id = %job.id, cycle = job.cycle, error = %err, "remote submission failed");
                Ok(Dispatch::Completed(CycleOutcome {
                    build: BuildResult::failed(format!("remote submission failed: {err}"), None),
                    run: None,
                }))
            }
        }
    }

    async fn poll(&self, handle: &RemoteHandle) -> Result<PollStatus, BackendError> {
        match self.client.status(&handle.remote_id).await {
            Ok(RemoteBuildStatus::Queued) | Ok(RemoteBuildStatus::Working) => {
                Ok(PollStatus::Pending)
            }
            Ok(RemoteBuildStatus::Succeeded) => Ok(PollStatus::Succeeded),
            Ok(RemoteBuildStatus::Failed) => Ok(PollStatus::Failed),
            Err(err) => Err(BackendError::Remote(err.to_string())),
        }
    }

    async fn collect(&self, handle: &RemoteHandle) -> Result<CycleOutcome, BackendError> {
        let status = self
            .client
            .status(&handle.remote_id)
            .await
            .map_err(|e| BackendError::Remote(e.to_string()))?;

        let log_bytes = self
            .artifacts
            .get(&handle.log_key)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?;
        let log_present = log_bytes.is_some();
        let log_text = log_bytes
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        let log_ref = log_present.then(|| handle.log_key.clone());

        if status == RemoteBuildStatus::Failed {
            let error = if log_text.is_empty() {
                "remote build failed".to_string()
            } else {
                format!("remote build failed: {}", tail(&log_text, 6))
            };
            return Ok(CycleOutcome {
                build: BuildResult::failed(error, log_ref),
                run: None,
            });
        }

        let metrics = self.metrics.extract(&log_text);
        let build = BuildResult::succeeded(log_ref.clone(), None);

        // Each remaining artifact may legitimately be absent.
        let reproducer_ref = self
            .artifacts
            .get(&handle.reproducer_key)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?
            .map(|_| handle.reproducer_key.clone());
        let corpus_ref = self
            .artifacts
            .get(&handle.corpus_key)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?
            .map(|_| handle.corpus_key.clone());
        let coverage_report_ref = self
            .artifacts
            .get(&handle.coverage_key)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?
            .map(|_| handle.coverage_key.clone());

        Ok(CycleOutcome {
            build: build.clone(),
            run: Some(RunResult {
                build,
                crashed: metrics.crashed,
                crash_category: metrics.crash_category,
                reproducer_ref,
                covered_edges: metrics.covered_edges,
                total_edges: metrics.total_edges,
                run_log_ref: log_ref,
                corpus_ref,
                coverage_report_ref,
            }),
        })
    }

    async fn cancel(&self, handle: &RemoteHandle) -> Result<(), BackendError> {
        self.client
            .cancel(&handle.remote_id)
            .await
            .map_err(|e| BackendError::Remote(e.to_string()))
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join(" | ")
}
